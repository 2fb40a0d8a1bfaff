//! Pipeline orchestrator
//!
//! Wires reader → classifier → upsert stores → reconciler and exposes the
//! resulting tables. Business rules live in the services; this module only
//! sequences them, writes through to storage and publishes events.
//!
//! # Error handling
//! - Per-file failures (ingest errors, parse errors, unclassified files) are
//!   logged, counted and reported as events. The pass continues.
//! - Records without a request key are dropped from the request table.
//! - Landing store or database failures are fatal: the pipeline publishes
//!   [`PipelineEvent::Halted`] and returns the error.
//!
//! # Idempotence
//! Ingesting the same [`RawRecord`] twice is a no-op the second time: the
//! audit log (`bronze_raw` when storage is attached) keys on `ingest_id`.
//! A file redelivered after a crash gets a new `ingest_id` but carries the
//! same content; the upsert stores absorb it.

use futures::StreamExt;
use parking_lot::RwLock;
use smile_common::{Error, EventBus, PipelineEvent, Result};
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::storage::Storage;
use super::{FileOutcome, PassSummary};
use crate::models::{
    AuditEntry, AuditStatus, RawRecord, RequestRecord, SampleKey, SampleOrigin, SampleRecord,
};
use crate::services::{
    AuditLog, Classification, LandingStore, RawIngestReader, ReadEvent, ReconcileChange,
    Reconciler, RecordClassifier, UpsertOutcome, UpsertStore,
};

/// Pipeline configuration, resolved once at startup
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Landing directory (or store root) to ingest from
    pub landing_path: PathBuf,
    /// File name suffix of request files
    pub request_suffix: String,
    /// File name suffix of standalone sample files
    pub sample_suffix: String,
    /// Pause between landing store polls in continuous mode
    pub poll_interval: Duration,
    /// Offset (hours from UTC) of the reporting timezone for `ingest_date`
    pub reporting_utc_offset_hours: i32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            landing_path: PathBuf::from("./landing"),
            request_suffix: "request.json".to_string(),
            sample_suffix: "sample.json".to_string(),
            poll_interval: Duration::from_millis(5_000),
            reporting_utc_offset_hours: -5,
        }
    }
}

/// Row counts of every table, plus the last pass
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineStats {
    pub audit_entries: usize,
    pub requests: usize,
    pub samples_from_request: usize,
    pub samples_from_sample_file: usize,
    pub samples: usize,
    pub last_pass: Option<PassSummary>,
}

/// Ingest pipeline and owner of the lakehouse tables
pub struct Pipeline {
    config: PipelineConfig,
    classifier: RecordClassifier,
    reader: RawIngestReader,
    requests: UpsertStore<RequestRecord>,
    samples_from_request: UpsertStore<SampleRecord>,
    samples_from_sample_file: UpsertStore<SampleRecord>,
    reconciler: Reconciler,
    /// Audit log of a pipeline without storage
    audit: AuditLog,
    /// Rows in whichever audit log is in use
    audit_entries: AtomicUsize,
    storage: Option<Storage>,
    event_bus: EventBus,
    last_pass: RwLock<Option<PassSummary>>,
}

impl Pipeline {
    /// In-memory pipeline
    pub fn new(config: PipelineConfig, event_bus: EventBus) -> Self {
        Self {
            classifier: RecordClassifier::new(&config.request_suffix, &config.sample_suffix),
            reader: RawIngestReader::with_offset_hours(config.reporting_utc_offset_hours),
            config,
            requests: UpsertStore::new("silver_requests"),
            samples_from_request: UpsertStore::new("silver_samples_from_request"),
            samples_from_sample_file: UpsertStore::new("silver_samples_from_sample_file"),
            reconciler: Reconciler::new(),
            audit: AuditLog::new(),
            audit_entries: AtomicUsize::new(0),
            storage: None,
            event_bus,
            last_pass: RwLock::new(None),
        }
    }

    /// Pipeline writing through to `pool`, recovered from its current contents
    pub async fn with_storage(
        config: PipelineConfig,
        event_bus: EventBus,
        pool: SqlitePool,
    ) -> Result<Self> {
        let mut pipeline = Self::new(config, event_bus);
        pipeline.storage = Some(Storage::new(pool));
        pipeline.recover().await?;
        Ok(pipeline)
    }

    /// Reload the upsert tables and recompute the reconciled samples
    async fn recover(&self) -> Result<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        let audit_entries = storage.audit_count().await?;
        self.audit_entries.store(audit_entries, Ordering::Relaxed);

        let tables = storage.recover().await?;
        self.requests.restore(tables.requests);
        self.samples_from_request.restore(tables.samples_from_request);
        self.samples_from_sample_file
            .restore(tables.samples_from_sample_file);

        let reconciled = self
            .reconciler
            .rebuild(&self.samples_from_request, &self.samples_from_sample_file);

        // A crash may have left the stored reconciled table behind its sources
        for row in self.reconciler.snapshot().values() {
            storage.persist_reconciled(row).await?;
        }

        info!(
            requests = self.requests.len(),
            samples = reconciled,
            audit_entries,
            "Pipeline state recovered"
        );
        Ok(())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn storage(&self) -> Option<&Storage> {
        self.storage.as_ref()
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// Drive one raw record through classification, upsert and reconciliation
    ///
    /// `Err` only for infrastructure failures.
    pub async fn ingest(&self, raw: RawRecord) -> Result<FileOutcome> {
        let classification = self.classifier.classify(&raw);
        let (status, detail) = match &classification {
            Classification::Request(_) => (AuditStatus::Request, None),
            Classification::Sample(_) => (AuditStatus::Sample, None),
            Classification::Unclassified => (AuditStatus::Unclassified, None),
            Classification::ParseError(e) => (AuditStatus::ParseError, Some(e.message.clone())),
        };

        let entry = AuditEntry::from_raw(&raw, status, detail);
        let appended = match &self.storage {
            Some(storage) => storage.persist_audit(&entry).await?,
            None => self.audit.append(entry),
        };
        if !appended {
            debug!(ingest_id = %raw.ingest_id, "Raw record already in audit log");
            return Ok(FileOutcome::Duplicate);
        }
        self.audit_entries.fetch_add(1, Ordering::Relaxed);

        let outcome = match classification {
            Classification::Request(bundle) => {
                let request_key = bundle.request.request_key.clone();
                self.apply_request(bundle.request).await?;

                for err in &bundle.fragment_errors {
                    warn!(path = %raw.file_path, error = %err, "Skipping malformed embedded sample");
                    self.event_bus.emit_lossy(PipelineEvent::ParseFailed {
                        file_path: raw.file_path.clone(),
                        message: err.to_string(),
                    });
                }

                for divergence in &bundle.divergences {
                    warn!(
                        path = %raw.file_path,
                        parent_request_key = ?divergence.parent_request_key,
                        sample_request_key = ?divergence.sample_request_key,
                        sample_key = ?divergence.sample_key,
                        "Embedded sample names a different request than its parent"
                    );
                    self.event_bus.emit_lossy(PipelineEvent::RequestIdDivergence {
                        file_path: raw.file_path.clone(),
                        parent_request_key: divergence.parent_request_key.clone(),
                        sample_request_key: divergence.sample_request_key.clone(),
                        sample_key: divergence.sample_key.clone(),
                    });
                }

                let samples = bundle.samples.len();
                for sample in bundle.samples {
                    self.apply_sample(sample).await?;
                }

                FileOutcome::Request {
                    request_key,
                    samples,
                    fragment_errors: bundle.fragment_errors.len(),
                }
            }
            Classification::Sample(sample) => {
                let key = sample.composite_key();
                self.apply_sample(sample).await?;
                FileOutcome::Sample { key }
            }
            Classification::Unclassified => {
                warn!(path = %raw.file_path, "File matches no known suffix, not classified");
                self.event_bus.emit_lossy(PipelineEvent::Unclassified {
                    file_path: raw.file_path.clone(),
                });
                FileOutcome::Unclassified
            }
            Classification::ParseError(e) => {
                warn!(path = %raw.file_path, error = %e, "Malformed JSON, file excluded from tables");
                self.event_bus.emit_lossy(PipelineEvent::ParseFailed {
                    file_path: raw.file_path.clone(),
                    message: e.to_string(),
                });
                FileOutcome::ParseError { message: e.message }
            }
        };

        self.event_bus.emit_lossy(PipelineEvent::FileIngested {
            ingest_id: raw.ingest_id,
            file_path: raw.file_path,
            status: status.as_str().to_string(),
            timestamp: raw.ingest_timestamp,
        });

        Ok(outcome)
    }

    async fn apply_request(&self, request: RequestRecord) -> Result<()> {
        let outcome = self.requests.apply(request.clone());
        match outcome {
            UpsertOutcome::Inserted | UpsertOutcome::Replaced => {
                if let Some(storage) = &self.storage {
                    storage.persist_request(&request).await?;
                }
                if let Some(request_key) = request.request_key {
                    self.event_bus.emit_lossy(PipelineEvent::RequestUpserted {
                        request_key,
                        ingest_timestamp: request.ingest_timestamp,
                    });
                }
            }
            UpsertOutcome::MissingKey => {
                debug!("Request without igoRequestId excluded from request table");
            }
            UpsertOutcome::Stale | UpsertOutcome::Duplicate => {}
        }
        Ok(())
    }

    async fn apply_sample(&self, sample: SampleRecord) -> Result<()> {
        let store = self.sample_store(sample.origin);
        if !store.apply(sample.clone()).changed() {
            return Ok(());
        }

        if let Some(storage) = &self.storage {
            storage.persist_sample(&sample).await?;
        }
        self.event_bus.emit_lossy(PipelineEvent::SampleUpserted {
            request_key: sample.request_key.clone(),
            sample_key: sample.sample_key.clone(),
            origin: sample.origin.as_str().to_string(),
            ingest_timestamp: sample.ingest_timestamp,
        });

        let key = sample.composite_key();
        if let ReconcileChange::Updated(row) = self.reconciler.refresh_key(
            &key,
            &self.samples_from_request,
            &self.samples_from_sample_file,
        ) {
            if let Some(storage) = &self.storage {
                storage.persist_reconciled(&row).await?;
            }
            self.event_bus.emit_lossy(PipelineEvent::SampleReconciled {
                request_key: row.request_key,
                sample_key: row.sample_key,
                origin: row.origin.as_str().to_string(),
            });
        }
        Ok(())
    }

    fn sample_store(&self, origin: SampleOrigin) -> &UpsertStore<SampleRecord> {
        match origin {
            SampleOrigin::FromRequest => &self.samples_from_request,
            SampleOrigin::FromSampleFile => &self.samples_from_sample_file,
        }
    }

    /// Poll the landing store once and ingest every delivery
    pub async fn run_pass(&self, store: &dyn LandingStore) -> Result<PassSummary> {
        let result = self.run_pass_inner(store).await;
        if let Err(e) = &result {
            self.halt(e);
        }
        result
    }

    async fn run_pass_inner(&self, store: &dyn LandingStore) -> Result<PassSummary> {
        let deliveries = store.poll().await?;
        let mut summary = PassSummary {
            files: deliveries.len(),
            ..PassSummary::default()
        };

        for delivery in deliveries {
            let file = match delivery {
                Ok(file) => file,
                Err(e) => {
                    warn!(path = %e.path(), error = %e, "Skipping unreadable file");
                    self.report_skipped(e.path(), &e.to_string());
                    summary.record_skipped();
                    continue;
                }
            };

            match self.reader.read(&file) {
                Ok(raw) => {
                    let outcome = self.ingest(raw).await?;
                    summary.record(&outcome);
                }
                Err(e) => {
                    warn!(path = %file.path, error = %e, "Skipping undecodable file");
                    self.report_skipped(&file.path, &e.to_string());
                    summary.record_skipped();
                }
            }
            store.acknowledge(&file).await?;
        }

        self.finish_pass(&mut summary);
        Ok(summary)
    }

    /// Ingest continuously until `cancel` fires
    ///
    /// Returns `Ok` on cancellation, `Err` when an infrastructure failure halted the pipeline.
    pub async fn run(&self, store: Arc<dyn LandingStore>, cancel: CancellationToken) -> Result<()> {
        info!(
            landing_path = %self.config.landing_path.display(),
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Continuous ingestion started"
        );

        let events = self
            .reader
            .stream(store, self.config.poll_interval, cancel.clone());
        futures::pin_mut!(events);

        let mut summary = PassSummary::default();
        while let Some(event) = events.next().await {
            let handled = match event {
                Ok(ReadEvent::Record(raw)) => self.ingest(raw).await.map(|outcome| {
                    summary.files += 1;
                    summary.record(&outcome);
                }),
                Ok(ReadEvent::Skipped(e)) => {
                    self.report_skipped(e.path(), &e.to_string());
                    summary.files += 1;
                    summary.record_skipped();
                    Ok(())
                }
                Ok(ReadEvent::PollCompleted { .. }) => {
                    self.finish_pass(&mut summary);
                    summary = PassSummary::default();
                    Ok(())
                }
                Err(e) => Err(e),
            };

            if let Err(e) = handled {
                self.halt(&e);
                return Err(e);
            }
        }

        info!("Continuous ingestion stopped");
        Ok(())
    }

    fn report_skipped(&self, path: &str, reason: &str) {
        self.event_bus.emit_lossy(PipelineEvent::FileSkipped {
            file_path: path.to_string(),
            reason: reason.to_string(),
        });
    }

    fn finish_pass(&self, summary: &mut PassSummary) {
        let now = chrono::Utc::now();
        summary.completed_at = Some(now);
        if summary.files > 0 {
            info!(
                files = summary.files,
                requests = summary.requests,
                samples = summary.samples,
                unclassified = summary.unclassified,
                parse_errors = summary.parse_errors,
                skipped = summary.skipped,
                "Ingestion pass completed"
            );
        }
        self.event_bus.emit_lossy(PipelineEvent::PassCompleted {
            files: summary.files,
            timestamp: now,
        });
        *self.last_pass.write() = Some(summary.clone());
    }

    fn halt(&self, err: &Error) {
        if err.is_infrastructure() {
            error!(error = %err, "Pipeline halted: landing store or database unavailable");
        } else {
            error!(error = %err, "Pipeline halted by internal error");
        }
        self.event_bus.emit_lossy(PipelineEvent::Halted {
            message: err.to_string(),
        });
    }

    // ========================================================================
    // Outputs
    // ========================================================================

    /// Current-Requests table
    pub fn current_requests(&self) -> BTreeMap<String, RequestRecord> {
        self.requests.snapshot()
    }

    pub fn request(&self, request_key: &str) -> Option<RequestRecord> {
        self.requests.get(&request_key.to_string())
    }

    /// Current-Samples table (reconciled)
    pub fn current_samples(&self) -> BTreeMap<SampleKey, SampleRecord> {
        self.reconciler.snapshot()
    }

    pub fn sample(&self, key: &SampleKey) -> Option<SampleRecord> {
        self.reconciler.get(key)
    }

    /// Per-origin sample table before reconciliation
    pub fn samples_by_origin(&self, origin: SampleOrigin) -> BTreeMap<SampleKey, SampleRecord> {
        self.sample_store(origin).snapshot()
    }

    /// In-memory audit log; always empty when storage is attached
    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn last_pass(&self) -> Option<PassSummary> {
        self.last_pass.read().clone()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            audit_entries: self.audit_entries.load(Ordering::Relaxed),
            requests: self.requests.len(),
            samples_from_request: self.samples_from_request.len(),
            samples_from_sample_file: self.samples_from_sample_file.len(),
            samples: self.reconciler.len(),
            last_pass: self.last_pass(),
        }
    }
}
