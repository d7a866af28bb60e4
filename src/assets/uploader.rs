//! Uploader
//!
//! Turns a byte stream of unknown length into a finalized asset. Incoming
//! reads are regrouped into fixed-size chunks, so peak memory per upload is
//! one chunk regardless of object size.
//!
//! The asset id exists from the first chunk write but is only returned once
//! `finalize` succeeds. Any failure, or the upload future being dropped,
//! removes the chunks written so far.

use std::num::NonZeroU32;
use std::pin::pin;
use std::time::Duration;

use chrono::Utc;
use futures::{Stream, StreamExt};

use crate::error::{AssetError, Result, UploadFailure};
use crate::store::{
    AssetId, AssetMetadata, ChunkStore, StoreError, DEFAULT_FILENAME, FALLBACK_CONTENT_TYPE,
};

/// Cleanup attempts before leaving remains to the orphan sweep
const CLEANUP_ATTEMPTS: u32 = 3;

/// Client-declared properties of an upload
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl UploadRequest {
    pub fn new(filename: Option<String>, content_type: Option<String>) -> Self {
        Self {
            filename,
            content_type,
        }
    }

    /// Advisory file name with any client path stripped
    fn resolved_filename(&self) -> String {
        self.filename
            .as_deref()
            .and_then(|name| name.rsplit(['/', '\\']).next())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_FILENAME)
            .to_string()
    }

    /// Declared type if it is a valid MIME type, else a guess from the file
    /// name extension, else `application/octet-stream`
    fn resolved_content_type(&self) -> String {
        if let Some(declared) = self
            .content_type
            .as_deref()
            .map(str::trim)
            .filter(|ct| ct.parse::<mime_guess::mime::Mime>().is_ok())
        {
            return declared.to_string();
        }

        self.filename
            .as_deref()
            .and_then(|name| mime_guess::from_path(name).first())
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
    }
}

/// Streams uploads into the chunk store
#[derive(Clone)]
pub struct Uploader {
    store: ChunkStore,
    chunk_size: NonZeroU32,
    max_object_bytes: u64,
}

impl Uploader {
    pub fn new(store: ChunkStore, chunk_size: NonZeroU32, max_object_bytes: u64) -> Self {
        Self {
            store,
            chunk_size,
            max_object_bytes,
        }
    }

    /// Store everything `source` yields as a new asset
    pub async fn upload<S, B, E>(&self, request: UploadRequest, source: S) -> Result<AssetMetadata>
    where
        S: Stream<Item = std::result::Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        self.upload_as(AssetId::new(), request, source).await
    }

    pub(crate) async fn upload_as<S, B, E>(
        &self,
        id: AssetId,
        request: UploadRequest,
        source: S,
    ) -> Result<AssetMetadata>
    where
        S: Stream<Item = std::result::Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let guard = CleanupGuard::new(self.store.clone(), id);

        match self.write_object(id, &request, source).await {
            Ok(metadata) => {
                guard.disarm();

                tracing::info!(
                    asset_id = %id,
                    filename = %metadata.filename,
                    content_type = %metadata.content_type,
                    length = metadata.length,
                    chunks = metadata.chunk_count,
                    "Asset uploaded"
                );

                Ok(metadata)
            }
            Err(e) => {
                tracing::warn!(asset_id = %id, "Upload failed, removing partial chunks: {}", e);

                // A write reported as failed may still have landed
                remove_partial(&self.store, id).await;
                guard.disarm();

                Err(e)
            }
        }
    }

    async fn write_object<S, B, E>(
        &self,
        id: AssetId,
        request: &UploadRequest,
        source: S,
    ) -> Result<AssetMetadata>
    where
        S: Stream<Item = std::result::Result<B, E>>,
        B: AsRef<[u8]>,
        E: std::fmt::Display,
    {
        let chunk_size = self.chunk_size.get() as usize;
        let mut source = pin!(source);
        let mut buffer: Vec<u8> = Vec::with_capacity(chunk_size);
        let mut length: u64 = 0;
        let mut sequence: u32 = 0;

        while let Some(item) = source.next().await {
            let bytes = item
                .map_err(|e| AssetError::UploadFailed(UploadFailure::Source(e.to_string())))?;
            let mut data = bytes.as_ref();

            length += data.len() as u64;
            if length > self.max_object_bytes {
                return Err(AssetError::PayloadTooLarge {
                    limit: self.max_object_bytes,
                });
            }

            while !data.is_empty() {
                let take = (chunk_size - buffer.len()).min(data.len());
                buffer.extend_from_slice(&data[..take]);
                data = &data[take..];

                if buffer.len() == chunk_size {
                    self.write_chunk(id, sequence, &buffer).await?;
                    buffer.clear();
                    sequence += 1;
                }
            }
        }

        if !buffer.is_empty() {
            self.write_chunk(id, sequence, &buffer).await?;
            sequence += 1;
        }

        let metadata = AssetMetadata {
            id,
            filename: request.resolved_filename(),
            content_type: request.resolved_content_type(),
            length,
            chunk_size: self.chunk_size.get(),
            chunk_count: sequence,
            created_at: Utc::now(),
        };

        self.store
            .finalize(&metadata)
            .await
            .map_err(|e| write_error(e, sequence))?;

        Ok(metadata)
    }

    async fn write_chunk(&self, id: AssetId, sequence: u32, data: &[u8]) -> Result<()> {
        self.store
            .write_chunk(id, sequence, data)
            .await
            .map_err(|e| write_error(e, sequence))
    }
}

/// An outage on the very first write is reported as unavailability
fn write_error(e: StoreError, chunks_written: u32) -> AssetError {
    if chunks_written == 0 && e.is_unavailable() {
        AssetError::StoreUnavailable(e.to_string())
    } else {
        AssetError::UploadFailed(UploadFailure::Store(e))
    }
}

/// Delete everything written for an unfinished upload
async fn remove_partial(store: &ChunkStore, id: AssetId) {
    for attempt in 1..=CLEANUP_ATTEMPTS {
        match store.delete_object(id).await {
            Ok(()) => {
                tracing::debug!(asset_id = %id, "Removed partial upload");
                return;
            }
            Err(e) if attempt < CLEANUP_ATTEMPTS => {
                tracing::warn!(asset_id = %id, attempt, "Partial upload cleanup failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100 * u64::from(attempt))).await;
            }
            Err(e) => {
                tracing::error!(
                    asset_id = %id,
                    "Giving up on partial upload cleanup, leaving it to the orphan sweep: {}",
                    e
                );
            }
        }
    }
}

/// Runs the cleanup if an upload is dropped before it settles
struct CleanupGuard {
    store: ChunkStore,
    id: AssetId,
    armed: bool,
}

impl CleanupGuard {
    fn new(store: ChunkStore, id: AssetId) -> Self {
        Self {
            store,
            id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let store = self.store.clone();
        let id = self.id;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!(asset_id = %id, "Upload aborted, removing partial chunks");
                handle.spawn(async move {
                    remove_partial(&store, id).await;
                });
            }
            Err(_) => {
                tracing::error!(
                    asset_id = %id,
                    "Upload aborted outside a runtime, leaving partial chunks to the orphan sweep"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::Arc;

    use futures::stream;

    use crate::store::{MemoryChunkStorage, StoreError};

    const CHUNK: usize = 262_144;

    fn size(bytes: u32) -> NonZeroU32 {
        NonZeroU32::new(bytes).unwrap()
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    /// Feed `data` in reads of `read_size` bytes
    fn reads(
        data: &[u8],
        read_size: usize,
    ) -> impl Stream<Item = std::result::Result<Vec<u8>, Infallible>> {
        let pieces: Vec<_> = data.chunks(read_size).map(|c| Ok(c.to_vec())).collect();
        stream::iter(pieces)
    }

    fn request() -> UploadRequest {
        UploadRequest::new(Some("cover.jpg".to_string()), Some("image/jpeg".to_string()))
    }

    #[tokio::test]
    async fn test_million_byte_upload() {
        let storage = Arc::new(MemoryChunkStorage::new());
        let store = ChunkStore::new(storage.clone(), true);
        let uploader = Uploader::new(store.clone(), size(CHUNK as u32), u64::MAX);

        let data = payload(1_000_000);
        let metadata = uploader.upload(request(), reads(&data, 65_536)).await.unwrap();

        assert_eq!(metadata.length, 1_000_000);
        assert_eq!(metadata.chunk_count, 4);
        assert_eq!(metadata.chunk_size, 262_144);

        let last = store.read_chunk(metadata.id, 3).await.unwrap();
        assert_eq!(last.len(), 213_568);
        assert_eq!(&last[..], &data[3 * CHUNK..]);

        let stored = store.read_metadata(metadata.id).await.unwrap();
        assert_eq!(stored, metadata);
    }

    #[tokio::test]
    async fn test_reads_need_not_align_with_chunks() {
        let store = ChunkStore::in_memory();
        let uploader = Uploader::new(store.clone(), size(10), u64::MAX);

        let data = payload(47);
        let metadata = uploader.upload(request(), reads(&data, 7)).await.unwrap();

        assert_eq!(metadata.chunk_count, 5);
        let mut rebuilt = Vec::new();
        for sequence in 0..metadata.chunk_count {
            let chunk = store.read_chunk(metadata.id, sequence).await.unwrap();
            assert_eq!(chunk.len(), metadata.expected_chunk_len(sequence).unwrap());
            rebuilt.extend_from_slice(&chunk);
        }
        assert_eq!(rebuilt, data);
    }

    #[tokio::test]
    async fn test_exact_chunk_multiple() {
        let store = ChunkStore::in_memory();
        let uploader = Uploader::new(store.clone(), size(8), u64::MAX);

        let metadata = uploader.upload(request(), reads(&payload(32), 5)).await.unwrap();
        assert_eq!(metadata.chunk_count, 4);
        assert_eq!(store.read_chunk(metadata.id, 3).await.unwrap().len(), 8);
        assert!(store.read_chunk(metadata.id, 4).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_length_upload() {
        let store = ChunkStore::in_memory();
        let uploader = Uploader::new(store.clone(), size(CHUNK as u32), u64::MAX);

        let empty = stream::empty::<std::result::Result<Vec<u8>, Infallible>>();
        let metadata = uploader.upload(request(), empty).await.unwrap();

        assert_eq!(metadata.length, 0);
        assert_eq!(metadata.chunk_count, 0);
        assert_eq!(store.read_metadata(metadata.id).await.unwrap().length, 0);
    }

    #[tokio::test]
    async fn test_source_abort_after_two_of_five_chunks() {
        let storage = Arc::new(MemoryChunkStorage::new());
        let store = ChunkStore::new(storage.clone(), true);
        let uploader = Uploader::new(store.clone(), size(4), u64::MAX);
        let id = AssetId::new();

        // Five chunks were announced; the connection drops after two
        let source = stream::iter(vec![
            Ok(b"aaaa".to_vec()),
            Ok(b"bbbb".to_vec()),
            Err("connection reset by peer"),
        ]);

        let result = uploader.upload_as(id, request(), source).await;
        assert!(matches!(
            result,
            Err(AssetError::UploadFailed(UploadFailure::Source(_)))
        ));

        assert!(matches!(store.read_metadata(id).await, Err(StoreError::NotFound(_))));
        assert_eq!(store.chunk_summary(id).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_write_failure_cleans_up() {
        let storage = Arc::new(MemoryChunkStorage::failing_after(2));
        let store = ChunkStore::new(storage.clone(), true);
        let uploader = Uploader::new(store.clone(), size(4), u64::MAX);
        let id = AssetId::new();

        let data = payload(20);
        let result = uploader.upload_as(id, request(), reads(&data, 4)).await;

        assert!(matches!(
            result,
            Err(AssetError::UploadFailed(UploadFailure::Store(StoreError::Backend(_))))
        ));
        assert!(matches!(store.read_metadata(id).await, Err(StoreError::NotFound(_))));
        assert_eq!(store.chunk_summary(id).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_unavailable_before_first_write() {
        let storage = Arc::new(MemoryChunkStorage::new());
        storage.set_unavailable(true);
        let uploader = Uploader::new(ChunkStore::new(storage.clone(), true), size(4), u64::MAX);

        let result = uploader.upload(request(), reads(&payload(10), 4)).await;
        assert!(matches!(result, Err(AssetError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_lost_write_ack_is_cleaned_up() {
        let storage = Arc::new(MemoryChunkStorage::new());
        storage.lose_write_acks(true);
        let store = ChunkStore::new(storage.clone(), true);
        let uploader = Uploader::new(store.clone(), size(4), u64::MAX);
        let id = AssetId::new();

        // The first chunk lands but the write reports an outage
        let result = uploader.upload_as(id, request(), reads(&payload(10), 4)).await;
        assert!(matches!(result, Err(AssetError::StoreUnavailable(_))));

        assert_eq!(store.chunk_summary(id).await.unwrap().count, 0);
        assert!(matches!(store.read_metadata(id).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_too_large() {
        let store = ChunkStore::in_memory();
        let uploader = Uploader::new(store.clone(), size(4), 10);
        let id = AssetId::new();

        let result = uploader.upload_as(id, request(), reads(&payload(16), 4)).await;
        assert!(matches!(result, Err(AssetError::PayloadTooLarge { limit: 10 })));
        assert_eq!(store.chunk_summary(id).await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_dropped_upload_is_cleaned_up() {
        let storage = Arc::new(MemoryChunkStorage::new());
        let store = ChunkStore::new(storage.clone(), true);
        let uploader = Uploader::new(store.clone(), size(4), u64::MAX);
        let id = AssetId::new();

        // Two chunks arrive, then the client goes silent
        let source = stream::iter(vec![Ok::<_, Infallible>(b"aaaabbbb".to_vec())])
            .chain(stream::pending());

        let task = tokio::spawn({
            let uploader = uploader.clone();
            async move { uploader.upload_as(id, request(), source).await }
        });

        for _ in 0..100 {
            if store.chunk_summary(id).await.unwrap().count == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.chunk_summary(id).await.unwrap().count, 2);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        for _ in 0..100 {
            if store.chunk_summary(id).await.unwrap().count == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(store.chunk_summary(id).await.unwrap().count, 0);
        assert!(matches!(store.read_metadata(id).await, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_resolved_request_fields() {
        let request = UploadRequest::new(Some("../../etc/cover.PNG".into()), None);
        assert_eq!(request.resolved_filename(), "cover.PNG");
        assert_eq!(request.resolved_content_type(), "image/png");

        let request = UploadRequest::new(Some("scan.bin".into()), Some("not a mime".into()));
        assert_eq!(request.resolved_content_type(), "application/octet-stream");

        let request = UploadRequest::new(None, Some("image/webp".into()));
        assert_eq!(request.resolved_filename(), "upload");
        assert_eq!(request.resolved_content_type(), "image/webp");

        let request = UploadRequest::default();
        assert_eq!(request.resolved_content_type(), "application/octet-stream");
    }
}
