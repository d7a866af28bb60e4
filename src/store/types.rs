//! Asset store types

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::StoreError;

// ============================================================================
// Constants
// ============================================================================

/// Default chunk size: 256KB
pub const DEFAULT_CHUNK_SIZE: NonZeroU32 = match NonZeroU32::new(256 * 1024) {
    Some(size) => size,
    None => unreachable!(),
};

/// Maximum object size: 50MB
pub const DEFAULT_MAX_OBJECT_SIZE: u64 = 50 * 1024 * 1024;

/// Content type recorded when the client declares none or an invalid one
pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Content type served for stored records that carry no content type
pub const DEFAULT_DOWNLOAD_CONTENT_TYPE: &str = "image/jpeg";

/// Filename recorded when the client supplies none
pub const DEFAULT_FILENAME: &str = "upload";

// ============================================================================
// Identifier
// ============================================================================

/// Opaque asset identifier.
///
/// Rendered as a hyphenated lowercase UUID. Only strings that parse as a UUID
/// are accepted as identifiers, so malformed input never reaches storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(Uuid);

impl AssetId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.as_hyphenated())
    }
}

/// Error returned for a string that is not a well-formed identifier
#[derive(Debug, Clone, thiserror::Error)]
#[error("Malformed asset id: {0}")]
pub struct InvalidAssetId(pub String);

impl FromStr for AssetId {
    type Err = InvalidAssetId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| InvalidAssetId(s.to_string()))
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Metadata record of a finalized asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    /// Asset identifier
    pub id: AssetId,

    /// Original client-supplied file name (advisory only)
    pub filename: String,

    /// MIME type
    pub content_type: String,

    /// Total size in bytes
    pub length: u64,

    /// Chunk size used to segment this asset
    pub chunk_size: u32,

    /// Number of chunks, `ceil(length / chunk_size)`
    pub chunk_count: u32,

    /// When the asset was finalized
    pub created_at: DateTime<Utc>,
}

impl AssetMetadata {
    /// Expected size of the chunk at `sequence`, or `None` if out of range
    pub fn expected_chunk_len(&self, sequence: u32) -> Option<usize> {
        if sequence >= self.chunk_count {
            return None;
        }
        let chunk_size = u64::from(self.chunk_size);
        let offset = u64::from(sequence) * chunk_size;
        Some((self.length - offset).min(chunk_size) as usize)
    }
}

/// Number of chunks needed to hold `length` bytes
pub fn chunk_count_for(length: u64, chunk_size: u32) -> u64 {
    length.div_ceil(u64::from(chunk_size))
}

/// Loosely-shaped metadata record as read back from a backend.
///
/// Every backend decodes into this shape first and converts it with
/// [`TryFrom`], so validation happens once at the storage boundary.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    pub id: String,
    pub filename: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub length: i64,
    pub chunk_size: i64,
    pub chunk_count: i64,
    pub created_at: String,
}

impl From<&AssetMetadata> for MetadataRecord {
    fn from(metadata: &AssetMetadata) -> Self {
        Self {
            id: metadata.id.to_string(),
            filename: metadata.filename.clone(),
            content_type: Some(metadata.content_type.clone()),
            length: metadata.length as i64,
            chunk_size: i64::from(metadata.chunk_size),
            chunk_count: i64::from(metadata.chunk_count),
            created_at: format_timestamp(&metadata.created_at),
        }
    }
}

impl TryFrom<MetadataRecord> for AssetMetadata {
    type Error = StoreError;

    fn try_from(record: MetadataRecord) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::CorruptObject {
            id: record.id.clone(),
            reason,
        };

        let id: AssetId = record
            .id
            .parse()
            .map_err(|_| corrupt("unparseable id".to_string()))?;

        let length = u64::try_from(record.length)
            .map_err(|_| corrupt(format!("negative length {}", record.length)))?;

        let chunk_size = u32::try_from(record.chunk_size)
            .ok()
            .filter(|size| *size > 0)
            .ok_or_else(|| corrupt(format!("invalid chunk size {}", record.chunk_size)))?;

        let chunk_count = u32::try_from(record.chunk_count)
            .map_err(|_| corrupt(format!("invalid chunk count {}", record.chunk_count)))?;

        if u64::from(chunk_count) != chunk_count_for(length, chunk_size) {
            return Err(corrupt(format!(
                "chunk count {} does not match length {} at chunk size {}",
                chunk_count, length, chunk_size
            )));
        }

        let created_at = DateTime::parse_from_rfc3339(&record.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| corrupt(format!("invalid timestamp: {}", e)))?;

        let content_type = record
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DOWNLOAD_CONTENT_TYPE.to_string());

        Ok(Self {
            id,
            filename: record.filename,
            content_type,
            length,
            chunk_size,
            chunk_count,
            created_at,
        })
    }
}

/// Timestamps are stored as fixed-width RFC 3339 so they compare lexically
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

// ============================================================================
// Chunk Summary
// ============================================================================

/// Aggregate view over the chunks stored for one object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkSummary {
    /// Number of stored chunks
    pub count: u64,

    /// Highest stored sequence number
    pub max_sequence: Option<u32>,

    /// Sum of all chunk lengths
    pub total_bytes: u64,
}

impl ChunkSummary {
    /// Check that the chunks form exactly the object described by `metadata`.
    ///
    /// Sequences are unique per object, so `count` chunks whose highest
    /// sequence is `count - 1` are contiguous.
    pub fn verify(&self, metadata: &AssetMetadata) -> Result<(), StoreError> {
        let expected_max = metadata.chunk_count.checked_sub(1);
        if self.count != u64::from(metadata.chunk_count)
            || self.max_sequence != expected_max
            || self.total_bytes != metadata.length
        {
            return Err(StoreError::IncompleteUpload {
                id: metadata.id.to_string(),
                expected_chunks: metadata.chunk_count,
                found_chunks: self.count,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(length: u64, chunk_size: u32) -> AssetMetadata {
        AssetMetadata {
            id: AssetId::new(),
            filename: "cover.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            length,
            chunk_size,
            chunk_count: chunk_count_for(length, chunk_size) as u32,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_asset_id_parse() {
        let id = AssetId::new();
        let parsed: AssetId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);

        assert!("not-an-id".parse::<AssetId>().is_err());
        assert!("".parse::<AssetId>().is_err());
        assert!("507f1f77bcf86cd799439011".parse::<AssetId>().is_err());
    }

    #[test]
    fn test_chunk_count_for() {
        assert_eq!(chunk_count_for(0, 262_144), 0);
        assert_eq!(chunk_count_for(1, 262_144), 1);
        assert_eq!(chunk_count_for(262_144, 262_144), 1);
        assert_eq!(chunk_count_for(262_145, 262_144), 2);
        assert_eq!(chunk_count_for(1_000_000, 262_144), 4);
    }

    #[test]
    fn test_expected_chunk_len() {
        let meta = metadata(1_000_000, 262_144);
        assert_eq!(meta.expected_chunk_len(0), Some(262_144));
        assert_eq!(meta.expected_chunk_len(2), Some(262_144));
        assert_eq!(meta.expected_chunk_len(3), Some(213_568));
        assert_eq!(meta.expected_chunk_len(4), None);
    }

    #[test]
    fn test_record_roundtrip() {
        let meta = metadata(1_000, 256);
        let record = MetadataRecord::from(&meta);
        let restored = AssetMetadata::try_from(record).unwrap();
        assert_eq!(restored.id, meta.id);
        assert_eq!(restored.chunk_count, 4);
        assert_eq!(restored.created_at.timestamp_micros(), meta.created_at.timestamp_micros());
    }

    #[test]
    fn test_record_defaults_content_type() {
        let mut record = MetadataRecord::from(&metadata(10, 4));
        record.content_type = None;
        let restored = AssetMetadata::try_from(record).unwrap();
        assert_eq!(restored.content_type, DEFAULT_DOWNLOAD_CONTENT_TYPE);
    }

    #[test]
    fn test_record_rejects_inconsistent_fields() {
        let mut record = MetadataRecord::from(&metadata(10, 4));
        record.chunk_count = 2;
        assert!(matches!(
            AssetMetadata::try_from(record),
            Err(StoreError::CorruptObject { .. })
        ));

        let mut record = MetadataRecord::from(&metadata(10, 4));
        record.length = -1;
        assert!(matches!(
            AssetMetadata::try_from(record),
            Err(StoreError::CorruptObject { .. })
        ));

        let mut record = MetadataRecord::from(&metadata(10, 4));
        record.chunk_size = 0;
        assert!(matches!(
            AssetMetadata::try_from(record),
            Err(StoreError::CorruptObject { .. })
        ));

        let mut record = MetadataRecord::from(&metadata(10, 4));
        record.created_at = "yesterday".to_string();
        assert!(matches!(
            AssetMetadata::try_from(record),
            Err(StoreError::CorruptObject { .. })
        ));
    }

    #[test]
    fn test_summary_verify() {
        let meta = metadata(10, 4);
        let complete = ChunkSummary {
            count: 3,
            max_sequence: Some(2),
            total_bytes: 10,
        };
        assert!(complete.verify(&meta).is_ok());

        let gap = ChunkSummary {
            count: 3,
            max_sequence: Some(3),
            total_bytes: 10,
        };
        assert!(matches!(gap.verify(&meta), Err(StoreError::IncompleteUpload { .. })));

        let short = ChunkSummary {
            count: 2,
            max_sequence: Some(1),
            total_bytes: 8,
        };
        assert!(short.verify(&meta).is_err());

        let empty = metadata(0, 4);
        assert!(ChunkSummary::default().verify(&empty).is_ok());
    }
}
