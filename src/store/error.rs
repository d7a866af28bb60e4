//! Storage error types

use thiserror::Error;

/// Errors raised by chunk store backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Chunk already exists: {id}#{sequence}")]
    DuplicateChunk { id: String, sequence: u32 },

    #[error("Empty chunk rejected: {id}#{sequence}")]
    InvalidSize { id: String, sequence: u32 },

    #[error("Incomplete upload {id}: expected {expected_chunks} chunks, found {found_chunks}")]
    IncompleteUpload {
        id: String,
        expected_chunks: u32,
        found_chunks: u64,
    },

    #[error("Object already finalized: {0}")]
    AlreadyFinalized(String),

    #[error("Corrupt object {id}: {reason}")]
    CorruptObject { id: String, reason: String },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether the backend could not be reached at all
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable(e.to_string())
            }
            other => Self::Backend(other.to_string()),
        }
    }
}
