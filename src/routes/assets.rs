//! Asset Routes
//!
//! Endpoints:
//! - POST /api/v1/assets - Upload one file (multipart/form-data)
//! - GET /api/v1/assets/:id - Stream an asset
//! - DELETE /api/v1/assets/:id - Remove an asset

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};

use crate::assets::UploadResponse;
use crate::error::{AssetError, Result};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(upload_asset))
        .route("/:id", get(download_asset).delete(delete_asset))
        // Upload size is enforced while streaming
        .layer(DefaultBodyLimit::disable())
}

async fn upload_asset(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>> {
    let multipart = multipart.map_err(|e| AssetError::InvalidInput(e.body_text()))?;
    let response = state.assets().handle_upload(multipart).await?;
    Ok(Json(response))
}

async fn download_asset(State(state): State<AppState>, Path(id): Path<String>) -> Result<Response> {
    state.assets().handle_download(&id).await
}

async fn delete_asset(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    state.assets().handle_delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
