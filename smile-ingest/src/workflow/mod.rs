//! Ingest workflow
//!
//! The pipeline drives every landed file through:
//! 1. Raw read (decode, provenance stamping)
//! 2. Audit log append
//! 3. Classification and parsing
//! 4. Upserts into the request table and the per-origin sample tables
//! 5. Per-key reconciliation of the sample tables
//!
//! Per-file failures are isolated and counted; infrastructure failures halt.

pub mod pipeline;
pub mod storage;

pub use pipeline::{Pipeline, PipelineConfig};
pub use storage::Storage;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::SampleKey;

/// How the pipeline handled one raw record
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Request {
        request_key: Option<String>,
        samples: usize,
        fragment_errors: usize,
    },
    Sample {
        key: SampleKey,
    },
    Unclassified,
    ParseError {
        message: String,
    },
    /// The same raw record (same `ingest_id`) was already ingested
    Duplicate,
}

/// Counters for one pass over the landing store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    /// Deliveries returned by the landing store
    pub files: usize,
    pub requests: usize,
    /// Standalone sample files
    pub samples: usize,
    pub unclassified: usize,
    pub parse_errors: usize,
    /// Files skipped with an ingest error (unreadable, not text)
    pub skipped: usize,
    pub duplicates: usize,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PassSummary {
    pub fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Request { .. } => self.requests += 1,
            FileOutcome::Sample { .. } => self.samples += 1,
            FileOutcome::Unclassified => self.unclassified += 1,
            FileOutcome::ParseError { .. } => self.parse_errors += 1,
            FileOutcome::Duplicate => self.duplicates += 1,
        }
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }
}
