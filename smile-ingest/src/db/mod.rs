//! SQLite persistence for the lakehouse tables
//!
//! One database holds the raw audit log (`bronze_raw`), the three upsert
//! tables, the reconciled sample table and the processed-file ledger.

pub mod audit;
pub mod ledger;
pub mod requests;
pub mod samples;

use chrono::{DateTime, Utc};
use smile_common::{Error, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

/// Open (creating if needed) the database at `db_path` and ensure its tables
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Private in-memory database with all tables created
///
/// Limited to one connection: every SQLite memory connection is its own database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create the lakehouse tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bronze_raw (
            ingest_id TEXT PRIMARY KEY,
            file_path TEXT NOT NULL,
            source_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            ingest_time TEXT NOT NULL,
            ingest_date TEXT NOT NULL,
            raw_text TEXT NOT NULL,
            file_size INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            modified_at TEXT,
            status TEXT NOT NULL,
            detail TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS silver_requests (
            request_key TEXT PRIMARY KEY,
            request_json TEXT NOT NULL,
            ingest_time TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    for table in samples::SampleTable::ALL {
        // row_key encodes the nullable composite key as one non-null column
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                row_key TEXT PRIMARY KEY,
                request_key TEXT,
                sample_key TEXT,
                cmo_sample_name TEXT,
                barcode TEXT,
                patient_id TEXT,
                sample_json TEXT NOT NULL,
                ingest_time TEXT NOT NULL,
                origin TEXT NOT NULL
            )
            "#,
            table.table_name()
        ))
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingested_files (
            path TEXT PRIMARY KEY,
            content_hash TEXT,
            file_size INTEGER NOT NULL,
            modified_at TEXT,
            ingested_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!(
        "Database tables initialized (bronze_raw, silver_requests, silver_samples*, ingested_files)"
    );

    Ok(())
}

/// Parse an RFC 3339 column value
pub(crate) fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Bad {} value {:?}: {}", column, value, e)))
}
