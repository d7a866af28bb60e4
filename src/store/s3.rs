//! S3 chunk storage
//!
//! Layout under the configured prefix:
//! - `{prefix}/chunks/{id}/{sequence:08}.chunk`
//! - `{prefix}/meta/{id}.json`
//!
//! The metadata object is a single PUT, so it appears atomically. Deletion
//! removes the metadata object first; chunks left behind by an interrupted
//! delete are orphans and get collected by the sweep.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::storage::S3Client;

use super::{AssetId, AssetMetadata, ChunkStorage, ChunkSummary, MetadataRecord, StoreError};

/// S3-based chunk storage
pub struct S3ChunkStorage {
    client: S3Client,
    prefix: String,
}

impl S3ChunkStorage {
    pub fn new(client: S3Client, prefix: String) -> Self {
        Self {
            client,
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    fn chunks_root(&self) -> String {
        format!("{}/chunks/", self.prefix)
    }

    fn chunk_prefix(&self, id: AssetId) -> String {
        format!("{}{}/", self.chunks_root(), id)
    }

    fn chunk_key(&self, id: AssetId, sequence: u32) -> String {
        format!("{}{:08}.chunk", self.chunk_prefix(id), sequence)
    }

    fn metadata_key(&self, id: AssetId) -> String {
        format!("{}/meta/{}.json", self.prefix, id)
    }
}

/// Split `{id}/{sequence}.chunk` (relative to the chunks root) into its parts
fn parse_chunk_key(relative: &str) -> Option<(AssetId, u32)> {
    let (id, file) = relative.split_once('/')?;
    let sequence = file.strip_suffix(".chunk")?.parse().ok()?;
    Some((id.parse().ok()?, sequence))
}

#[async_trait::async_trait]
impl ChunkStorage for S3ChunkStorage {
    async fn write_chunk(
        &self,
        id: AssetId,
        sequence: u32,
        data: &[u8],
    ) -> Result<(), StoreError> {
        let key = self.chunk_key(id, sequence);

        if self.client.object_exists(&key).await? {
            return Err(StoreError::DuplicateChunk {
                id: id.to_string(),
                sequence,
            });
        }

        self.client
            .put_object(&key, data.to_vec(), "application/octet-stream")
            .await
    }

    async fn insert_metadata(&self, metadata: &AssetMetadata) -> Result<(), StoreError> {
        let key = self.metadata_key(metadata.id);

        if self.client.object_exists(&key).await? {
            return Err(StoreError::AlreadyFinalized(metadata.id.to_string()));
        }

        let body = serde_json::to_vec(&MetadataRecord::from(metadata))
            .map_err(|e| StoreError::Backend(format!("Failed to encode metadata: {}", e)))?;

        self.client.put_object(&key, body, "application/json").await
    }

    async fn read_metadata(&self, id: AssetId) -> Result<AssetMetadata, StoreError> {
        let data = self
            .client
            .get_object(&self.metadata_key(id))
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => StoreError::NotFound(id.to_string()),
                other => other,
            })?;

        let record: MetadataRecord =
            serde_json::from_slice(&data).map_err(|e| StoreError::CorruptObject {
                id: id.to_string(),
                reason: format!("unreadable metadata record: {}", e),
            })?;

        AssetMetadata::try_from(record)
    }

    async fn read_chunk(&self, id: AssetId, sequence: u32) -> Result<Vec<u8>, StoreError> {
        self.client.get_object(&self.chunk_key(id, sequence)).await
    }

    async fn chunk_summary(&self, id: AssetId) -> Result<ChunkSummary, StoreError> {
        let root = self.chunks_root();
        let objects = self
            .client
            .list_all_objects(Some(&self.chunk_prefix(id)))
            .await?;

        let mut summary = ChunkSummary::default();
        for object in objects {
            let Some((_, sequence)) = object
                .key
                .strip_prefix(&root)
                .and_then(parse_chunk_key)
            else {
                continue;
            };

            summary.count += 1;
            summary.total_bytes += object.size.max(0) as u64;
            summary.max_sequence = summary.max_sequence.max(Some(sequence));
        }

        Ok(summary)
    }

    async fn delete_object(&self, id: AssetId) -> Result<(), StoreError> {
        self.client.delete_object(&self.metadata_key(id)).await?;

        let removed = self
            .client
            .delete_objects_with_prefix(&self.chunk_prefix(id))
            .await?;

        tracing::trace!(asset_id = %id, chunks = removed, "Removed S3 chunks");

        Ok(())
    }

    async fn orphaned_objects(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<AssetId>, StoreError> {
        let root = self.chunks_root();
        let objects = self.client.list_all_objects(Some(&root)).await?;

        // Newest chunk per object
        let mut newest: HashMap<AssetId, Option<DateTime<Utc>>> = HashMap::new();
        for object in objects {
            let Some((id, _)) = object.key.strip_prefix(&root).and_then(parse_chunk_key) else {
                continue;
            };
            let entry = newest.entry(id).or_default();
            *entry = (*entry).max(object.last_modified);
        }

        let mut orphaned = Vec::new();
        for (id, last_modified) in newest {
            if last_modified.is_some_and(|ts| ts >= older_than) {
                continue;
            }
            if !self.client.object_exists(&self.metadata_key(id)).await? {
                orphaned.push(id);
            }
        }

        Ok(orphaned)
    }
}
