//! Error types for the asset service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::store::{AssetId, StoreError};

/// Service-wide result type
pub type Result<T> = std::result::Result<T, AssetError>;

/// Errors surfaced at the asset service boundary
#[derive(Error, Debug)]
pub enum AssetError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Asset not found: {0}")]
    NotFound(AssetId),

    #[error("Asset exceeds the maximum size of {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("Corrupt asset: {0}")]
    CorruptObject(String),

    #[error("Upload failed: {0}")]
    UploadFailed(#[source] UploadFailure),

    #[error("Storage unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Underlying cause of a failed upload
#[derive(Error, Debug)]
pub enum UploadFailure {
    #[error("chunk write failed: {0}")]
    Store(#[from] StoreError),

    #[error("request body read failed: {0}")]
    Source(String),
}

impl AssetError {
    /// Map a read-path storage error for a known asset id
    pub fn from_store(id: AssetId, e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => Self::NotFound(id),
            StoreError::CorruptObject { reason, .. } => {
                Self::CorruptObject(format!("{}: {}", id, reason))
            }
            StoreError::IncompleteUpload { .. } => Self::CorruptObject(e.to_string()),
            StoreError::Unavailable(msg) => Self::StoreUnavailable(msg),
            other => Self::Internal(other.to_string()),
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::CorruptObject(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UploadFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to clients
    fn public_message(&self) -> String {
        match self {
            Self::InvalidInput(msg) => msg.clone(),
            Self::NotFound(id) => format!("Asset not found: {}", id),
            Self::PayloadTooLarge { .. } => self.to_string(),
            Self::CorruptObject(_) => "Stored asset is corrupt".to_string(),
            Self::UploadFailed(_) => "Upload failed".to_string(),
            Self::StoreUnavailable(_) => "Storage temporarily unavailable".to_string(),
            Self::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for AssetError {
    fn into_response(self) -> Response {
        match &self {
            AssetError::CorruptObject(msg) => {
                tracing::error!("Storage integrity fault: {}", msg);
            }
            AssetError::UploadFailed(e) => {
                tracing::error!("Upload failed: {}", e);
            }
            AssetError::StoreUnavailable(msg) => {
                tracing::error!("Storage unavailable: {}", msg);
            }
            AssetError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
            }
            _ => {}
        }

        let body = Json(ErrorResponse {
            error: self.public_message(),
        });

        (self.status_code(), body).into_response()
    }
}
