//! Chunk Store
//!
//! Persists assets as an ordered sequence of fixed-size chunks plus one
//! metadata record. Backends:
//! - SQLite (default, durable)
//! - S3-compatible object storage
//! - In-memory (tests and ephemeral runs)
//!
//! Metadata is always written last, so a reader either finds no metadata or
//! a fully written object.

pub mod error;
pub mod memory;
pub mod s3;
pub mod sqlite;
pub mod types;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::storage::S3Client;

pub use error::StoreError;
pub use memory::MemoryChunkStorage;
pub use s3::S3ChunkStorage;
pub use sqlite::SqliteChunkStorage;
pub use types::*;

// ============================================================================
// Chunk Storage Trait
// ============================================================================

/// Trait for chunk storage backends
#[async_trait::async_trait]
pub trait ChunkStorage: Send + Sync {
    /// Store one chunk; fails with `DuplicateChunk` if it already exists
    async fn write_chunk(
        &self,
        id: AssetId,
        sequence: u32,
        data: &[u8],
    ) -> Result<(), StoreError>;

    /// Persist the metadata record in a single atomic operation
    async fn insert_metadata(&self, metadata: &AssetMetadata) -> Result<(), StoreError>;

    /// Get the metadata record for an object
    async fn read_metadata(&self, id: AssetId) -> Result<AssetMetadata, StoreError>;

    /// Get a chunk by object and sequence
    async fn read_chunk(&self, id: AssetId, sequence: u32) -> Result<Vec<u8>, StoreError>;

    /// Summarize the chunks stored for an object
    async fn chunk_summary(&self, id: AssetId) -> Result<ChunkSummary, StoreError>;

    /// Delete metadata and all chunks of an object; missing objects are not an error
    async fn delete_object(&self, id: AssetId) -> Result<(), StoreError>;

    /// Objects that have chunks but no metadata, last written before `older_than`
    async fn orphaned_objects(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<AssetId>, StoreError>;
}

#[async_trait::async_trait]
impl<T: ChunkStorage + ?Sized> ChunkStorage for Arc<T> {
    async fn write_chunk(
        &self,
        id: AssetId,
        sequence: u32,
        data: &[u8],
    ) -> Result<(), StoreError> {
        (**self).write_chunk(id, sequence, data).await
    }

    async fn insert_metadata(&self, metadata: &AssetMetadata) -> Result<(), StoreError> {
        (**self).insert_metadata(metadata).await
    }

    async fn read_metadata(&self, id: AssetId) -> Result<AssetMetadata, StoreError> {
        (**self).read_metadata(id).await
    }

    async fn read_chunk(&self, id: AssetId, sequence: u32) -> Result<Vec<u8>, StoreError> {
        (**self).read_chunk(id, sequence).await
    }

    async fn chunk_summary(&self, id: AssetId) -> Result<ChunkSummary, StoreError> {
        (**self).chunk_summary(id).await
    }

    async fn delete_object(&self, id: AssetId) -> Result<(), StoreError> {
        (**self).delete_object(id).await
    }

    async fn orphaned_objects(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<AssetId>, StoreError> {
        (**self).orphaned_objects(older_than).await
    }
}

// ============================================================================
// Chunk Store (Main Implementation)
// ============================================================================

/// Main chunk store with pluggable backends
#[derive(Clone)]
pub struct ChunkStore {
    inner: Arc<ChunkStoreInner>,
}

struct ChunkStoreInner {
    /// Storage backend
    backend: Box<dyn ChunkStorage>,

    /// Verify chunk completeness before writing metadata
    verify_finalize: bool,
}

impl ChunkStore {
    /// Create with an arbitrary backend
    pub fn new(backend: impl ChunkStorage + 'static, verify_finalize: bool) -> Self {
        Self {
            inner: Arc::new(ChunkStoreInner {
                backend: Box::new(backend),
                verify_finalize,
            }),
        }
    }

    /// Create with in-memory storage
    pub fn in_memory() -> Self {
        Self::new(MemoryChunkStorage::new(), true)
    }

    /// Create with SQLite storage
    pub fn with_sqlite(pool: SqlitePool, verify_finalize: bool) -> Self {
        Self::new(SqliteChunkStorage::new(pool), verify_finalize)
    }

    /// Create with S3 storage
    pub fn with_s3(client: S3Client, prefix: String, verify_finalize: bool) -> Self {
        Self::new(S3ChunkStorage::new(client, prefix), verify_finalize)
    }

    /// Store one chunk.
    ///
    /// Empty chunks are rejected: a zero-length object has no chunks at all.
    pub async fn write_chunk(
        &self,
        id: AssetId,
        sequence: u32,
        data: &[u8],
    ) -> Result<(), StoreError> {
        if data.is_empty() {
            return Err(StoreError::InvalidSize {
                id: id.to_string(),
                sequence,
            });
        }

        self.inner.backend.write_chunk(id, sequence, data).await?;

        tracing::trace!(
            asset_id = %id,
            sequence = sequence,
            size = data.len(),
            "Stored chunk"
        );

        Ok(())
    }

    /// Make an object visible to readers by writing its metadata record
    pub async fn finalize(&self, metadata: &AssetMetadata) -> Result<(), StoreError> {
        if self.inner.verify_finalize {
            let summary = self.inner.backend.chunk_summary(metadata.id).await?;
            summary.verify(metadata)?;
        }

        self.inner.backend.insert_metadata(metadata).await?;

        tracing::debug!(
            asset_id = %metadata.id,
            length = metadata.length,
            chunks = metadata.chunk_count,
            "Finalized asset"
        );

        Ok(())
    }

    /// Get the metadata record of a finalized object
    pub async fn read_metadata(&self, id: AssetId) -> Result<AssetMetadata, StoreError> {
        self.inner.backend.read_metadata(id).await
    }

    /// Get one chunk of an object
    pub async fn read_chunk(&self, id: AssetId, sequence: u32) -> Result<Vec<u8>, StoreError> {
        self.inner.backend.read_chunk(id, sequence).await
    }

    /// Summarize the chunks currently stored for an object
    pub async fn chunk_summary(&self, id: AssetId) -> Result<ChunkSummary, StoreError> {
        self.inner.backend.chunk_summary(id).await
    }

    /// Remove an object and all of its chunks
    pub async fn delete_object(&self, id: AssetId) -> Result<(), StoreError> {
        self.inner.backend.delete_object(id).await?;
        tracing::debug!(asset_id = %id, "Deleted asset");
        Ok(())
    }

    /// Find objects with chunks but no metadata, idle since before `older_than`
    pub async fn orphaned_objects(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<AssetId>, StoreError> {
        self.inner.backend.orphaned_objects(older_than).await
    }
}

// ============================================================================
// Tests
// ============================================================================
