//! Raw audit log (`bronze_raw`) persistence

use chrono::NaiveDate;
use smile_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::parse_timestamp;
use crate::models::{sequence_text, AuditEntry, AuditStatus, FileMetadata};

/// Append an audit entry
///
/// Returns `false` when the `ingest_id` was already logged; the existing row
/// is left untouched.
pub async fn insert_audit_entry(pool: &SqlitePool, entry: &AuditEntry) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO bronze_raw (
            ingest_id, file_path, source_path, file_name, ingest_time, ingest_date,
            raw_text, file_size, content_hash, modified_at, status, detail
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.ingest_id.to_string())
    .bind(&entry.file_path)
    .bind(&entry.source_path)
    .bind(&entry.file_name)
    .bind(sequence_text(&entry.ingest_timestamp))
    .bind(entry.ingest_date.to_string())
    .bind(&entry.raw_text)
    .bind(entry.file_metadata.file_size as i64)
    .bind(&entry.file_metadata.content_hash)
    .bind(entry.file_metadata.modified_at.as_ref().map(sequence_text))
    .bind(entry.status.as_str())
    .bind(&entry.detail)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Newest `limit` entries, newest first
pub async fn load_recent(pool: &SqlitePool, limit: i64) -> Result<Vec<AuditEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT ingest_id, file_path, source_path, file_name, ingest_time, ingest_date,
               raw_text, file_size, content_hash, modified_at, status, detail
        FROM bronze_raw
        ORDER BY rowid DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(entry_from_row).collect()
}

pub async fn count_entries(pool: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM bronze_raw")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

fn entry_from_row(row: &SqliteRow) -> Result<AuditEntry> {
    let id_str: String = row.get("ingest_id");
    let ingest_id = Uuid::parse_str(&id_str)
        .map_err(|e| Error::Internal(format!("Bad ingest_id {:?}: {}", id_str, e)))?;

    let date_str: String = row.get("ingest_date");
    let ingest_date = date_str
        .parse::<NaiveDate>()
        .map_err(|e| Error::Internal(format!("Bad ingest_date {:?}: {}", date_str, e)))?;

    let status_str: String = row.get("status");
    let status = AuditStatus::parse(&status_str)
        .ok_or_else(|| Error::Internal(format!("Unknown audit status {:?}", status_str)))?;

    let ingest_time: String = row.get("ingest_time");
    let modified_at: Option<String> = row.get("modified_at");
    let file_size: i64 = row.get("file_size");

    Ok(AuditEntry {
        ingest_id,
        file_path: row.get("file_path"),
        source_path: row.get("source_path"),
        file_name: row.get("file_name"),
        ingest_timestamp: parse_timestamp("ingest_time", &ingest_time)?,
        ingest_date,
        raw_text: row.get("raw_text"),
        file_metadata: FileMetadata {
            file_size: file_size.max(0) as u64,
            content_hash: row.get("content_hash"),
            modified_at: modified_at
                .as_deref()
                .map(|v| parse_timestamp("modified_at", v))
                .transpose()?,
        },
        status,
        detail: row.get("detail"),
    })
}
