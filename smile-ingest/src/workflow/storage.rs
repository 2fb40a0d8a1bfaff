//! Durable copy of the pipeline tables
//!
//! Every in-memory change is written through to SQLite. The SQL upsert
//! guards repeat the in-memory compare-and-replace rule, so writes landing
//! out of order still leave the newest row stored.

use smile_common::Result;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::db::{self, samples::SampleTable};
use crate::models::{AuditEntry, RequestRecord, SampleRecord};

/// Rows reloaded at startup
#[derive(Debug, Default)]
pub struct RecoveredTables {
    pub requests: Vec<RequestRecord>,
    pub samples_from_request: Vec<SampleRecord>,
    pub samples_from_sample_file: Vec<SampleRecord>,
}

/// Write-through persistence for the pipeline
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Append to the audit log; `false` if the entry was already stored
    pub async fn persist_audit(&self, entry: &AuditEntry) -> Result<bool> {
        db::audit::insert_audit_entry(&self.pool, entry).await
    }

    /// Rows in the stored audit log
    pub async fn audit_count(&self) -> Result<usize> {
        let count = db::audit::count_entries(&self.pool).await?;
        Ok(count.max(0) as usize)
    }

    pub async fn persist_request(&self, record: &RequestRecord) -> Result<()> {
        let written = db::requests::upsert_request(&self.pool, record).await?;
        debug!(request_key = ?record.request_key, written, "Persisted request");
        Ok(())
    }

    /// Write a sample to the table of its origin
    pub async fn persist_sample(&self, record: &SampleRecord) -> Result<()> {
        let table = SampleTable::for_origin(record.origin);
        db::samples::upsert_sample(&self.pool, table, record).await?;
        Ok(())
    }

    pub async fn persist_reconciled(&self, record: &SampleRecord) -> Result<()> {
        db::samples::upsert_sample(&self.pool, SampleTable::Reconciled, record).await?;
        Ok(())
    }

    /// Load the three upsert tables
    ///
    /// The reconciled table is not loaded; it is recomputed from these.
    pub async fn recover(&self) -> Result<RecoveredTables> {
        let tables = RecoveredTables {
            requests: db::requests::load_requests(&self.pool).await?,
            samples_from_request: db::samples::load_samples(&self.pool, SampleTable::FromRequest)
                .await?,
            samples_from_sample_file: db::samples::load_samples(
                &self.pool,
                SampleTable::FromSampleFile,
            )
            .await?,
        };

        info!(
            requests = tables.requests.len(),
            samples_from_request = tables.samples_from_request.len(),
            samples_from_sample_file = tables.samples_from_sample_file.len(),
            "Recovered upsert tables from database"
        );
        Ok(tables)
    }
}
