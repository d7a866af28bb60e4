//! Orphan sweep
//!
//! Collects chunks whose upload never reached `finalize` and whose cleanup
//! did not run (process crash, exhausted cleanup retries). Only objects idle
//! for longer than the grace period are touched, so in-flight uploads are
//! left alone.

use std::time::Duration;

use chrono::Utc;

use crate::store::{ChunkStore, StoreError};

/// Periodic reconciliation of chunks without metadata
#[derive(Clone)]
pub struct OrphanSweeper {
    store: ChunkStore,
    grace: Duration,
}

impl OrphanSweeper {
    pub fn new(store: ChunkStore, grace: Duration) -> Self {
        Self { store, grace }
    }

    /// Run one sweep, returning the number of objects removed
    pub async fn sweep_once(&self) -> Result<usize, StoreError> {
        let cutoff = chrono::Duration::from_std(self.grace)
            .ok()
            .and_then(|grace| Utc::now().checked_sub_signed(grace))
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let candidates = self.store.orphaned_objects(cutoff).await?;
        let mut removed = 0;

        for id in candidates {
            // Finalized since the scan; it is no longer an orphan
            match self.store.read_metadata(id).await {
                Ok(_) => continue,
                Err(StoreError::NotFound(_)) => {}
                Err(StoreError::CorruptObject { .. }) => continue,
                Err(e) => return Err(e),
            }

            match self.store.delete_object(id).await {
                Ok(()) => {
                    removed += 1;
                    tracing::debug!(asset_id = %id, "Removed orphaned chunks");
                }
                Err(e) => {
                    tracing::warn!(asset_id = %id, "Failed to remove orphaned chunks: {}", e);
                }
            }
        }

        if removed > 0 {
            tracing::info!(count = removed, "Cleaned up orphaned uploads");
        }

        Ok(removed)
    }

    /// Start background sweep task
    pub fn start(self, period: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;
                if let Err(e) = self.sweep_once().await {
                    tracing::warn!("Orphan sweep failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{chunk_count_for, AssetId, AssetMetadata};

    async fn finalized(store: &ChunkStore) -> AssetId {
        let id = AssetId::new();
        store.write_chunk(id, 0, b"cover").await.unwrap();
        store
            .finalize(&AssetMetadata {
                id,
                filename: "cover.jpg".into(),
                content_type: "image/jpeg".into(),
                length: 5,
                chunk_size: 8,
                chunk_count: chunk_count_for(5, 8) as u32,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        id
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_orphans_only() {
        let store = ChunkStore::in_memory();
        let kept = finalized(&store).await;

        let orphan = AssetId::new();
        store.write_chunk(orphan, 0, b"abandoned").await.unwrap();
        store.write_chunk(orphan, 1, b"upload").await.unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;

        let sweeper = OrphanSweeper::new(store.clone(), Duration::ZERO);
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);

        assert_eq!(store.chunk_summary(orphan).await.unwrap().count, 0);
        assert_eq!(store.chunk_summary(kept).await.unwrap().count, 1);
        assert!(store.read_metadata(kept).await.is_ok());

        // Nothing left to do
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sweep_respects_grace_period() {
        let store = ChunkStore::in_memory();
        let in_flight = AssetId::new();
        store.write_chunk(in_flight, 0, b"still uploading").await.unwrap();

        let sweeper = OrphanSweeper::new(store.clone(), Duration::from_secs(3600));
        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
        assert_eq!(store.chunk_summary(in_flight).await.unwrap().count, 1);
    }
}
