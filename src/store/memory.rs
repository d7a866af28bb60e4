//! In-memory chunk storage

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{AssetId, AssetMetadata, ChunkStorage, ChunkSummary, MetadataRecord, StoreError};

struct StoredChunk {
    data: Vec<u8>,
    stored_at: DateTime<Utc>,
}

/// Process-local chunk storage.
///
/// Supports fault injection so the write-failure and outage paths of the
/// upload pipeline can be exercised without a real backend.
#[derive(Default)]
pub struct MemoryChunkStorage {
    /// Object -> sequence -> chunk
    chunks: RwLock<HashMap<AssetId, BTreeMap<u32, StoredChunk>>>,

    /// Finalized metadata, kept in its stored shape
    metadata: RwLock<HashMap<AssetId, MetadataRecord>>,

    /// Remaining successful chunk writes before writes start failing
    write_budget: Option<AtomicUsize>,

    /// Simulated outage
    unavailable: AtomicBool,

    /// Chunk writes land but report an outage
    lose_write_acks: AtomicBool,
}

impl MemoryChunkStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage whose chunk writes fail after `writes` successful ones
    pub fn failing_after(writes: usize) -> Self {
        Self {
            write_budget: Some(AtomicUsize::new(writes)),
            ..Self::default()
        }
    }

    /// Simulate the backend becoming unreachable (or reachable again)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Store chunks but report each write as an outage
    pub fn lose_write_acks(&self, lose: bool) {
        self.lose_write_acks.store(lose, Ordering::SeqCst);
    }

    /// Drop a single chunk, bypassing the object lifecycle
    pub async fn remove_chunk(&self, id: AssetId, sequence: u32) -> bool {
        let mut chunks = self.chunks.write().await;
        chunks
            .get_mut(&id)
            .and_then(|object| object.remove(&sequence))
            .is_some()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    fn take_write_budget(&self) -> Result<(), StoreError> {
        if let Some(budget) = &self.write_budget {
            budget
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .map_err(|_| StoreError::Backend("injected write failure".to_string()))?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChunkStorage for MemoryChunkStorage {
    async fn write_chunk(
        &self,
        id: AssetId,
        sequence: u32,
        data: &[u8],
    ) -> Result<(), StoreError> {
        self.check_available()?;

        let mut chunks = self.chunks.write().await;
        let object = chunks.entry(id).or_default();

        if object.contains_key(&sequence) {
            return Err(StoreError::DuplicateChunk {
                id: id.to_string(),
                sequence,
            });
        }

        self.take_write_budget()?;

        object.insert(
            sequence,
            StoredChunk {
                data: data.to_vec(),
                stored_at: Utc::now(),
            },
        );

        if self.lose_write_acks.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write acknowledgement lost".to_string()));
        }

        Ok(())
    }

    async fn insert_metadata(&self, metadata: &AssetMetadata) -> Result<(), StoreError> {
        self.check_available()?;

        let mut records = self.metadata.write().await;
        if records.contains_key(&metadata.id) {
            return Err(StoreError::AlreadyFinalized(metadata.id.to_string()));
        }
        records.insert(metadata.id, MetadataRecord::from(metadata));

        Ok(())
    }

    async fn read_metadata(&self, id: AssetId) -> Result<AssetMetadata, StoreError> {
        self.check_available()?;

        let record = self
            .metadata
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        AssetMetadata::try_from(record)
    }

    async fn read_chunk(&self, id: AssetId, sequence: u32) -> Result<Vec<u8>, StoreError> {
        self.check_available()?;

        let chunks = self.chunks.read().await;
        chunks
            .get(&id)
            .and_then(|object| object.get(&sequence))
            .map(|chunk| chunk.data.clone())
            .ok_or_else(|| StoreError::NotFound(format!("{}#{}", id, sequence)))
    }

    async fn chunk_summary(&self, id: AssetId) -> Result<ChunkSummary, StoreError> {
        self.check_available()?;

        let chunks = self.chunks.read().await;
        let Some(object) = chunks.get(&id) else {
            return Ok(ChunkSummary::default());
        };

        Ok(ChunkSummary {
            count: object.len() as u64,
            max_sequence: object.keys().next_back().copied(),
            total_bytes: object.values().map(|chunk| chunk.data.len() as u64).sum(),
        })
    }

    async fn delete_object(&self, id: AssetId) -> Result<(), StoreError> {
        self.check_available()?;

        // Hold both locks so readers never see metadata without its chunks
        let mut records = self.metadata.write().await;
        let mut chunks = self.chunks.write().await;
        records.remove(&id);
        chunks.remove(&id);

        Ok(())
    }

    async fn orphaned_objects(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<AssetId>, StoreError> {
        self.check_available()?;

        let records = self.metadata.read().await;
        let chunks = self.chunks.read().await;

        let orphaned = chunks
            .iter()
            .filter(|(id, _)| !records.contains_key(*id))
            .filter(|(_, object)| {
                object
                    .values()
                    .map(|chunk| chunk.stored_at)
                    .max()
                    .map_or(true, |newest| newest < older_than)
            })
            .map(|(id, _)| *id)
            .collect();

        Ok(orphaned)
    }
}
