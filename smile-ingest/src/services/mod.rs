//! Service modules for the ingest pipeline
//!
//! Leaves first: landing store access and raw reading, classification,
//! keyed upsert tables, sample reconciliation, the audit log.

pub mod audit_log;
pub mod classifier;
pub mod landing_scanner;
pub mod raw_reader;
pub mod reconciler;
pub mod upsert_store;

pub use audit_log::AuditLog;
pub use classifier::{
    Classification, FileKind, ParseError, RecordClassifier, RequestBundle, RequestIdDivergence,
};
pub use landing_scanner::{
    content_hash, Delivery, DirectoryLandingStore, LandedFile, LandingStore, MemoryLandingStore,
};
pub use raw_reader::{IngestError, RawIngestReader, ReadEvent};
pub use reconciler::{reconcile, ReconcileChange, Reconciler};
pub use upsert_store::{UpsertOutcome, UpsertStore, Upsertable};
