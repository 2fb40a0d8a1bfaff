//! In-memory raw audit log
//!
//! Append-only record of every delivered file, whatever its classification.
//! Appending is idempotent per `ingest_id`, so replaying one delivery never
//! produces a second entry.
//!
//! Only pipelines without storage keep their audit log here. With a
//! database attached the log lives in `bronze_raw` and nothing is held in
//! memory.

use parking_lot::RwLock;
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::{AuditEntry, AuditStatus};

#[derive(Default)]
struct Inner {
    entries: Vec<AuditEntry>,
    ids: HashSet<Uuid>,
}

/// Append-only audit log
#[derive(Default)]
pub struct AuditLog {
    inner: RwLock<Inner>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; returns `false` if its `ingest_id` is already logged
    pub fn append(&self, entry: AuditEntry) -> bool {
        let mut inner = self.inner.write();
        if !inner.ids.insert(entry.ingest_id) {
            return false;
        }
        inner.entries.push(entry);
        true
    }

    pub fn contains(&self, ingest_id: &Uuid) -> bool {
        self.inner.read().ids.contains(ingest_id)
    }

    /// All entries in append order
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.inner.read().entries.clone()
    }

    /// Newest `limit` entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        self.inner
            .read()
            .entries
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn count_by_status(&self, status: AuditStatus) -> usize {
        self.inner
            .read()
            .entries
            .iter()
            .filter(|e| e.status == status)
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}
