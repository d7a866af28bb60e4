//! SQLite chunk storage
//!
//! Chunks and metadata live in two tables. Every operation acquires a
//! connection from the shared pool for its own duration only.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::types::format_timestamp;
use super::{AssetId, AssetMetadata, ChunkStorage, ChunkSummary, MetadataRecord, StoreError};

/// SQLite-backed chunk storage
pub struct SqliteChunkStorage {
    pool: SqlitePool,
}

impl SqliteChunkStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait::async_trait]
impl ChunkStorage for SqliteChunkStorage {
    async fn write_chunk(
        &self,
        id: AssetId,
        sequence: u32,
        data: &[u8],
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO asset_chunks (object_id, sequence, data, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(i64::from(sequence))
        .bind(data)
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateChunk {
                id: id.to_string(),
                sequence,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn insert_metadata(&self, metadata: &AssetMetadata) -> Result<(), StoreError> {
        let record = MetadataRecord::from(metadata);

        let result = sqlx::query(
            r#"
            INSERT INTO asset_metadata
                (id, filename, content_type, length, chunk_size, chunk_count, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.filename)
        .bind(&record.content_type)
        .bind(record.length)
        .bind(record.chunk_size)
        .bind(record.chunk_count)
        .bind(&record.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::AlreadyFinalized(record.id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_metadata(&self, id: AssetId) -> Result<AssetMetadata, StoreError> {
        let record = sqlx::query_as::<_, MetadataRecord>(
            r#"
            SELECT id, filename, content_type, length, chunk_size, chunk_count, created_at
            FROM asset_metadata
            WHERE id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        AssetMetadata::try_from(record)
    }

    async fn read_chunk(&self, id: AssetId, sequence: u32) -> Result<Vec<u8>, StoreError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as(
            r#"
            SELECT data
            FROM asset_chunks
            WHERE object_id = ? AND sequence = ?
            "#,
        )
        .bind(id.to_string())
        .bind(i64::from(sequence))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(data,)| data)
            .ok_or_else(|| StoreError::NotFound(format!("{}#{}", id, sequence)))
    }

    async fn chunk_summary(&self, id: AssetId) -> Result<ChunkSummary, StoreError> {
        let (count, max_sequence, total_bytes): (i64, Option<i64>, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), MAX(sequence), COALESCE(SUM(LENGTH(data)), 0)
            FROM asset_chunks
            WHERE object_id = ?
            "#,
        )
        .bind(id.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(ChunkSummary {
            count: count.max(0) as u64,
            max_sequence: max_sequence.and_then(|seq| u32::try_from(seq).ok()),
            total_bytes: total_bytes.max(0) as u64,
        })
    }

    async fn delete_object(&self, id: AssetId) -> Result<(), StoreError> {
        let id = id.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM asset_metadata WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM asset_chunks WHERE object_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn orphaned_objects(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<AssetId>, StoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT c.object_id
            FROM asset_chunks c
            LEFT JOIN asset_metadata m ON m.id = c.object_id
            WHERE m.id IS NULL
            GROUP BY c.object_id
            HAVING MAX(c.created_at) < ?
            "#,
        )
        .bind(format_timestamp(&older_than))
        .fetch_all(&self.pool)
        .await?;

        let ids = rows
            .into_iter()
            .filter_map(|(raw,)| match raw.parse::<AssetId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(
                        object_id = %raw,
                        "Skipping chunks with unparseable owner: {}",
                        e
                    );
                    None
                }
            })
            .collect();

        Ok(ids)
    }
}
