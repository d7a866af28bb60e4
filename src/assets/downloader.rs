//! Downloader
//!
//! Replays a finalized asset as a lazy stream of chunks. Metadata is resolved
//! before any chunk I/O, and every poll of the stream performs exactly one
//! chunk read.

use axum::body::Bytes;
use futures::stream::{self, BoxStream, StreamExt};

use crate::store::{AssetId, AssetMetadata, ChunkStore, StoreError};

/// An opened asset: its metadata plus a one-shot chunk stream
pub struct AssetStream {
    pub metadata: AssetMetadata,
    pub chunks: BoxStream<'static, Result<Bytes, StoreError>>,
}

impl std::fmt::Debug for AssetStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetStream")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Reads assets back out of the chunk store
#[derive(Clone)]
pub struct Downloader {
    store: ChunkStore,
}

/// Cursor over the remaining chunks of one open stream
struct ReadState {
    store: ChunkStore,
    metadata: AssetMetadata,
    next: u32,
    failed: bool,
}

impl Downloader {
    pub fn new(store: ChunkStore) -> Self {
        Self { store }
    }

    /// Resolve an asset and prepare its chunk stream.
    ///
    /// Fails with `NotFound` before touching any chunk if the asset has no
    /// metadata. The stream yields chunks `0..chunk_count` in order and ends
    /// after the first error.
    pub async fn open(&self, id: AssetId) -> Result<AssetStream, StoreError> {
        let metadata = self.store.read_metadata(id).await?;

        let state = ReadState {
            store: self.store.clone(),
            metadata: metadata.clone(),
            next: 0,
            failed: false,
        };

        let chunks = stream::unfold(state, |mut state| async move {
            if state.failed || state.next >= state.metadata.chunk_count {
                return None;
            }

            let sequence = state.next;
            state.next += 1;

            let result = read_verified(&state.store, &state.metadata, sequence).await;
            if result.is_err() {
                state.failed = true;
            }

            Some((result, state))
        })
        .boxed();

        Ok(AssetStream { metadata, chunks })
    }

    /// Read a whole asset into memory
    pub async fn read_all(&self, id: AssetId) -> Result<Vec<u8>, StoreError> {
        let mut opened = self.open(id).await?;
        let mut data = Vec::with_capacity(opened.metadata.length as usize);

        while let Some(chunk) = opened.chunks.next().await {
            data.extend_from_slice(&chunk?);
        }

        Ok(data)
    }
}

/// Read one chunk and check it against the size the metadata implies
async fn read_verified(
    store: &ChunkStore,
    metadata: &AssetMetadata,
    sequence: u32,
) -> Result<Bytes, StoreError> {
    let corrupt = |reason: String| StoreError::CorruptObject {
        id: metadata.id.to_string(),
        reason,
    };

    let data = store
        .read_chunk(metadata.id, sequence)
        .await
        .map_err(|e| match e {
            StoreError::NotFound(_) => corrupt(format!("missing chunk {}", sequence)),
            other => other,
        })?;

    let expected = metadata.expected_chunk_len(sequence).unwrap_or(0);
    if data.len() != expected {
        return Err(corrupt(format!(
            "chunk {} holds {} bytes, expected {}",
            sequence,
            data.len(),
            expected
        )));
    }

    Ok(Bytes::from(data))
}
