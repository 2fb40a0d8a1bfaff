//! Data models for the lakehouse ingest pipeline
//!
//! Raw records come out of the landing store, typed request/sample records
//! come out of the classifier, audit entries describe every delivery.

pub mod audit;
pub mod raw_record;
pub mod request;
pub mod sample;

pub use audit::{AuditEntry, AuditStatus};
pub use raw_record::{FileMetadata, RawRecord};
pub use request::RequestRecord;
pub use sample::{SampleKey, SampleOrigin, SampleRecord};

use chrono::{DateTime, SecondsFormat, Utc};

/// Render a timestamp as fixed-width RFC 3339 (nanoseconds, `Z` suffix)
///
/// Fixed width keeps lexicographic order equal to chronological order, which
/// the SQLite upsert guards rely on.
pub fn sequence_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}
