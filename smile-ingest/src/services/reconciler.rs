//! Multi-source sample reconciler
//!
//! Samples reach the lakehouse from two origins: embedded in request files
//! and as standalone sample files. Each origin has its own upsert table. The
//! reconciler unions both tables and keeps one row per `(request_key,
//! sample_key)`: the most recent by `ingest_timestamp`.
//!
//! # Ranking
//! Rows are ranked by `(ingest_timestamp, origin)` with
//! `FROM_SAMPLE_FILE` above `FROM_REQUEST` at equal timestamps. Should two
//! rows still compare equal (same origin on both sides), the row from the
//! second table wins. Null key components group like any other value.
//!
//! [`reconcile`] is the batch form. [`Reconciler`] maintains the same result
//! incrementally, one composite key at a time; both agree for equal inputs.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use tracing::debug;

use super::upsert_store::UpsertStore;
use crate::models::{SampleKey, SampleOrigin, SampleRecord};

/// Pick the current row among candidates for one composite key
///
/// Later candidates win full ties.
pub fn select_current<'a, I>(candidates: I) -> Option<&'a SampleRecord>
where
    I: IntoIterator<Item = &'a SampleRecord>,
{
    candidates
        .into_iter()
        .max_by(|a, b| rank(a).cmp(&rank(b)))
}

fn rank(record: &SampleRecord) -> (DateTime<Utc>, SampleOrigin) {
    (record.ingest_timestamp, record.origin)
}

/// Batch reconciliation of two sample tables
pub fn reconcile(
    table_a: &BTreeMap<SampleKey, SampleRecord>,
    table_b: &BTreeMap<SampleKey, SampleRecord>,
) -> BTreeMap<SampleKey, SampleRecord> {
    // Union keeps every row from both sides; a key may appear twice here
    let mut groups: BTreeMap<&SampleKey, Vec<&SampleRecord>> = BTreeMap::new();
    for (key, row) in table_a.iter().chain(table_b.iter()) {
        groups.entry(key).or_default().push(row);
    }

    groups
        .into_iter()
        .filter_map(|(key, rows)| select_current(rows).map(|row| (key.clone(), row.clone())))
        .collect()
}

/// Result of refreshing one composite key
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileChange {
    /// The reconciled row for the key is now this record
    Updated(SampleRecord),
    /// The reconciled row was already current
    Unchanged,
    /// Neither source table has the key
    Absent,
}

/// Incrementally maintained reconciled sample table
///
/// Holds no state that cannot be recomputed from the two source tables.
#[derive(Default)]
pub struct Reconciler {
    rows: DashMap<SampleKey, SampleRecord>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the reconciled row for one key from both source tables
    ///
    /// Sources are read while the key's derived entry is locked, so two
    /// refreshes of one key cannot publish out of order. Each source read
    /// sees a whole row, never a partially applied one.
    pub fn refresh_key(
        &self,
        key: &SampleKey,
        from_request: &UpsertStore<SampleRecord>,
        from_sample_file: &UpsertStore<SampleRecord>,
    ) -> ReconcileChange {
        match self.rows.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                let sources = [from_request.get(key), from_sample_file.get(key)];
                match select_current(sources.iter().flatten()) {
                    Some(row) if row == slot.get() => ReconcileChange::Unchanged,
                    Some(row) => {
                        slot.insert(row.clone());
                        debug!(key = ?key, origin = %row.origin, "Reconciled sample changed");
                        ReconcileChange::Updated(row.clone())
                    }
                    None => {
                        slot.remove();
                        ReconcileChange::Absent
                    }
                }
            }
            Entry::Vacant(slot) => {
                let sources = [from_request.get(key), from_sample_file.get(key)];
                match select_current(sources.iter().flatten()) {
                    Some(row) => {
                        slot.insert(row.clone());
                        debug!(key = ?key, origin = %row.origin, "Reconciled sample added");
                        ReconcileChange::Updated(row.clone())
                    }
                    None => ReconcileChange::Absent,
                }
            }
        }
    }

    /// Replace the whole derived table with a batch reconciliation
    pub fn rebuild(
        &self,
        from_request: &UpsertStore<SampleRecord>,
        from_sample_file: &UpsertStore<SampleRecord>,
    ) -> usize {
        let rebuilt = reconcile(&from_request.snapshot(), &from_sample_file.snapshot());
        self.rows.retain(|key, _| rebuilt.contains_key(key));
        for (key, row) in rebuilt {
            self.rows.insert(key, row);
        }
        self.rows.len()
    }

    pub fn get(&self, key: &SampleKey) -> Option<SampleRecord> {
        self.rows.get(key).map(|row| row.value().clone())
    }

    pub fn snapshot(&self) -> BTreeMap<SampleKey, SampleRecord> {
        self.rows
            .iter()
            .map(|row| (row.key().clone(), row.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
