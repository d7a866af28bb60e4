//! Database schema initialization

use sqlx::SqlitePool;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- Asset chunks, written before their metadata record exists
CREATE TABLE IF NOT EXISTS asset_chunks (
    object_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    data BLOB NOT NULL,
    created_at TEXT NOT NULL,

    PRIMARY KEY (object_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_asset_chunks_created ON asset_chunks(created_at);

-- Asset metadata, inserted last to make the object visible
CREATE TABLE IF NOT EXISTS asset_metadata (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    content_type TEXT,
    length INTEGER NOT NULL,
    chunk_size INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
"#;
