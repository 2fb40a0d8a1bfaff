//! Raw records as read from the landing store

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// File-level metadata captured at read time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Size of the file content in bytes
    pub file_size: u64,
    /// Hex-encoded SHA-256 of the file content
    pub content_hash: String,
    /// Filesystem modification time, when the landing store exposes one
    pub modified_at: Option<DateTime<Utc>>,
}

/// One delivered file, immutable once created
///
/// Carries enough provenance (`ingest_id`, path, arrival time) for the
/// pipeline to turn at-least-once delivery into exactly-once effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    /// Identity of this delivery in the audit log
    pub ingest_id: Uuid,
    /// Full path of the file in the landing store
    pub file_path: String,
    /// Landing store root the file was read from
    pub source_path: String,
    /// File name component of `file_path`, used for classification
    pub file_name: String,
    /// Arrival time (UTC); the sequence value for every record derived from this file
    pub ingest_timestamp: DateTime<Utc>,
    /// Arrival date in the reporting timezone
    pub ingest_date: NaiveDate,
    /// File content, decoded as UTF-8
    pub raw_text: String,
    pub file_metadata: FileMetadata,
}
