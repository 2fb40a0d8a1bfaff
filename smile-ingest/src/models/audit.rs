//! Raw audit log entries

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{FileMetadata, RawRecord};

/// How a delivered file was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Request,
    Sample,
    Unclassified,
    ParseError,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Request => "request",
            AuditStatus::Sample => "sample",
            AuditStatus::Unclassified => "unclassified",
            AuditStatus::ParseError => "parse_error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "request" => Some(AuditStatus::Request),
            "sample" => Some(AuditStatus::Sample),
            "unclassified" => Some(AuditStatus::Unclassified),
            "parse_error" => Some(AuditStatus::ParseError),
            _ => None,
        }
    }
}

/// One row of the append-only raw audit log
///
/// Keeps the full raw payload so any file can be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub ingest_id: Uuid,
    pub file_path: String,
    pub source_path: String,
    pub file_name: String,
    pub ingest_timestamp: DateTime<Utc>,
    pub ingest_date: NaiveDate,
    pub raw_text: String,
    pub file_metadata: FileMetadata,
    pub status: AuditStatus,
    /// Parse error message for `ParseError` entries
    pub detail: Option<String>,
}

impl AuditEntry {
    pub fn from_raw(raw: &RawRecord, status: AuditStatus, detail: Option<String>) -> Self {
        Self {
            ingest_id: raw.ingest_id,
            file_path: raw.file_path.clone(),
            source_path: raw.source_path.clone(),
            file_name: raw.file_name.clone(),
            ingest_timestamp: raw.ingest_timestamp,
            ingest_date: raw.ingest_date,
            raw_text: raw.raw_text.clone(),
            file_metadata: raw.file_metadata.clone(),
            status,
            detail,
        }
    }
}
