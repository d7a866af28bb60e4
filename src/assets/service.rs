//! Asset service
//!
//! HTTP-facing façade over the uploader, downloader and chunk store. Handlers
//! in `routes::assets` delegate here so the request handling can be exercised
//! without a router.

use axum::{
    body::Body,
    extract::Multipart,
    http::{header, HeaderValue},
    response::Response,
};
use futures::StreamExt;
use serde::Serialize;

use crate::config::AssetConfig;
use crate::error::{AssetError, Result};
use crate::store::{AssetId, ChunkStore, FALLBACK_CONTENT_TYPE};

use super::downloader::Downloader;
use super::uploader::{UploadRequest, Uploader};

/// Body returned after a successful upload
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub file_id: String,
}

#[derive(Clone)]
pub struct AssetService {
    uploader: Uploader,
    downloader: Downloader,
    store: ChunkStore,
    cache_control: String,
}

impl AssetService {
    pub fn new(store: ChunkStore, config: &AssetConfig) -> Self {
        Self {
            uploader: Uploader::new(store.clone(), config.chunk_size, config.max_object_bytes),
            downloader: Downloader::new(store.clone()),
            store,
            cache_control: config.cache_control.clone(),
        }
    }

    pub fn store(&self) -> &ChunkStore {
        &self.store
    }

    /// Store the first file field of a multipart body.
    ///
    /// Fields without a filename are skipped. The field is streamed into the
    /// uploader as it arrives, so the request body is never buffered whole.
    pub async fn handle_upload(&self, mut multipart: Multipart) -> Result<UploadResponse> {
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| AssetError::InvalidInput(format!("Malformed multipart body: {}", e)))?
        {
            let Some(filename) = field.file_name().map(str::to_string) else {
                tracing::debug!(field = ?field.name(), "Skipping non-file multipart field");
                continue;
            };

            let request = UploadRequest::new(
                Some(filename),
                field.content_type().map(str::to_string),
            );
            let metadata = self.uploader.upload(request, field).await?;

            return Ok(UploadResponse {
                message: "File uploaded successfully".to_string(),
                file_id: metadata.id.to_string(),
            });
        }

        Err(AssetError::InvalidInput("No file uploaded".to_string()))
    }

    /// Stream an asset back to the client.
    ///
    /// Headers are sent once metadata resolves. A chunk fault after that point
    /// surfaces as a body error, which aborts the response instead of
    /// delivering truncated content as success.
    pub async fn handle_download(&self, raw_id: &str) -> Result<Response> {
        let id = parse_id(raw_id)?;

        let opened = self
            .downloader
            .open(id)
            .await
            .map_err(|e| AssetError::from_store(id, e))?;
        let metadata = opened.metadata;

        tracing::debug!(
            asset_id = %id,
            length = metadata.length,
            chunks = metadata.chunk_count,
            "Streaming asset"
        );

        let chunks = opened.chunks.map(move |chunk| {
            chunk.map_err(|e| {
                tracing::error!(asset_id = %id, "Storage integrity fault mid-stream: {}", e);
                e
            })
        });

        let content_type = HeaderValue::from_str(&metadata.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE));

        Response::builder()
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, metadata.length)
            .header(header::CACHE_CONTROL, self.cache_control.as_str())
            .header(
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", disposition_filename(&metadata.filename)),
            )
            .body(Body::from_stream(chunks))
            .map_err(|e| AssetError::Internal(e.to_string()))
    }

    /// Remove an asset and all of its chunks; unknown ids succeed
    pub async fn handle_delete(&self, raw_id: &str) -> Result<()> {
        let id = parse_id(raw_id)?;

        self.store
            .delete_object(id)
            .await
            .map_err(|e| AssetError::from_store(id, e))?;

        tracing::info!(asset_id = %id, "Asset deleted");
        Ok(())
    }
}

fn parse_id(raw: &str) -> Result<AssetId> {
    raw.parse()
        .map_err(|e: crate::store::InvalidAssetId| AssetError::InvalidInput(e.to_string()))
}

/// Filename safe to place inside a quoted header parameter
fn disposition_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::http::StatusCode;
    use futures::stream;

    use crate::store::MemoryChunkStorage;

    fn config(chunk_size: u32) -> AssetConfig {
        AssetConfig {
            chunk_size: std::num::NonZeroU32::new(chunk_size).unwrap(),
            ..AssetConfig::default()
        }
    }

    async fn stored(service: &AssetService, name: &str, data: &[u8]) -> AssetId {
        let source = stream::iter(vec![Ok::<_, std::convert::Infallible>(data.to_vec())]);
        service
            .uploader
            .upload(UploadRequest::new(Some(name.into()), None), source)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_download_headers_and_body() {
        let service = AssetService::new(ChunkStore::in_memory(), &config(4));
        let id = stored(&service, "cover.png", b"0123456789").await;

        let response = service.handle_download(&id.to_string()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(headers[header::CONTENT_LENGTH], "10");
        assert_eq!(
            headers[header::CACHE_CONTROL],
            "public, max-age=31536000, immutable"
        );
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "inline; filename=\"cover.png\""
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"0123456789");
    }

    #[tokio::test]
    async fn test_download_errors() {
        let service = AssetService::new(ChunkStore::in_memory(), &config(4));

        let malformed = service.handle_download("not-an-id").await.unwrap_err();
        assert_eq!(malformed.status_code(), StatusCode::BAD_REQUEST);

        let unknown = service
            .handle_download(&AssetId::new().to_string())
            .await
            .unwrap_err();
        assert_eq!(unknown.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_corrupt_object_aborts_body() {
        let storage = Arc::new(MemoryChunkStorage::new());
        let service = AssetService::new(ChunkStore::new(storage.clone(), true), &config(4));
        let id = stored(&service, "cover.jpg", b"0123456789").await;
        assert!(storage.remove_chunk(id, 1).await);

        let response = service.handle_download(&id.to_string()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await;
        assert!(body.is_err());
    }

    #[tokio::test]
    async fn test_delete_then_download() {
        let service = AssetService::new(ChunkStore::in_memory(), &config(4));
        let id = stored(&service, "cover.jpg", b"0123456789").await;

        service.handle_delete(&id.to_string()).await.unwrap();
        assert_eq!(service.store().chunk_summary(id).await.unwrap().count, 0);

        let gone = service.handle_download(&id.to_string()).await.unwrap_err();
        assert_eq!(gone.status_code(), StatusCode::NOT_FOUND);

        // Idempotent
        service.handle_delete(&id.to_string()).await.unwrap();
        service.handle_delete(&AssetId::new().to_string()).await.unwrap();
    }

    #[test]
    fn test_disposition_filename() {
        assert_eq!(disposition_filename("cover.jpg"), "cover.jpg");
        assert_eq!(disposition_filename("my \"best\" cover.jpg"), "my _best_ cover.jpg");
        assert_eq!(disposition_filename("obálka\r\n.jpg"), "ob_lka__.jpg");
    }
}
