//! Processed-file ledger
//!
//! One row per landing path with the size, modification time and content
//! hash it was last seen with. Reloaded at startup so a restart resumes
//! after the last processed file. A file that could not be read is recorded
//! without a hash and is retried once its size or mtime changes.

use chrono::{DateTime, Utc};
use smile_common::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use super::parse_timestamp;
use crate::models::sequence_text;

/// Last known state of one landing file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// `None` when the file could not be read
    pub content_hash: Option<String>,
    pub file_size: u64,
    pub modified_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    /// Whether filesystem metadata shows the file untouched since this entry
    ///
    /// Without an mtime nothing can be concluded; the file must be read.
    pub fn matches_metadata(&self, file_size: u64, modified_at: Option<DateTime<Utc>>) -> bool {
        modified_at.is_some() && self.modified_at == modified_at && self.file_size == file_size
    }
}

/// Record the current state of a file
pub async fn record_ingested(
    pool: &SqlitePool,
    path: &str,
    entry: &LedgerEntry,
    ingested_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO ingested_files (path, content_hash, file_size, modified_at, ingested_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            content_hash = excluded.content_hash,
            file_size = excluded.file_size,
            modified_at = excluded.modified_at,
            ingested_at = excluded.ingested_at
        "#,
    )
    .bind(path)
    .bind(&entry.content_hash)
    .bind(entry.file_size as i64)
    .bind(entry.modified_at.as_ref().map(sequence_text))
    .bind(sequence_text(&ingested_at))
    .execute(pool)
    .await?;

    Ok(())
}

/// Path → last known state of every recorded file
pub async fn load_ledger(pool: &SqlitePool) -> Result<HashMap<String, LedgerEntry>> {
    let rows = sqlx::query(
        "SELECT path, content_hash, file_size, modified_at FROM ingested_files",
    )
    .fetch_all(pool)
    .await?;

    let mut ledger = HashMap::with_capacity(rows.len());
    for row in rows {
        let modified_at: Option<String> = row.get("modified_at");
        let file_size: i64 = row.get("file_size");
        let entry = LedgerEntry {
            content_hash: row.get("content_hash"),
            file_size: file_size.max(0) as u64,
            modified_at: modified_at
                .map(|value| parse_timestamp("modified_at", &value))
                .transpose()?,
        };
        ledger.insert(row.get("path"), entry);
    }
    Ok(ledger)
}

pub async fn count_ingested(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ingested_files")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
