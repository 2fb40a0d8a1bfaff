//! Keyed upsert store (type-1 change data capture)
//!
//! Keeps exactly one row per business key: the record with the greatest
//! sequence value seen so far. Older versions are discarded, not archived.
//!
//! # Merge rule
//! - Absent key: insert.
//! - Present key, incoming sequence `<` current: ignore (out-of-order arrival).
//! - Present key, incoming sequence `>=` current: replace. At equal sequence the
//!   most recently applied record wins.
//! - Identical record (same key, sequence and payload): no-op.
//!
//! # Concurrency
//! The compare-and-replace step runs under the map's entry lock, so two
//! `apply` calls for one key never interleave. Keys on other shards proceed
//! in parallel. Readers only ever see whole rows.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use tracing::debug;

/// An entity that can live in an [`UpsertStore`]
pub trait Upsertable: Clone + PartialEq + Send + Sync + 'static {
    /// Business key type
    type Key: Clone + Eq + Hash + Ord + Debug + Send + Sync + 'static;
    /// Comparable sequence type deciding which version is current
    type Sequence: Ord + Copy + Debug;

    /// Business key, `None` when the record cannot be merged
    fn key(&self) -> Option<Self::Key>;

    /// Sequence value of this version
    fn sequence(&self) -> Self::Sequence;
}

/// Result of a single [`UpsertStore::apply`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First version for the key
    Inserted,
    /// Replaced an older (or equal-sequence) version
    Replaced,
    /// Exact duplicate of the current row; nothing changed
    Duplicate,
    /// Older than the current row; ignored
    Stale,
    /// Record has no business key; excluded from the table
    MissingKey,
}

impl UpsertOutcome {
    /// Whether the observable table state changed
    pub fn changed(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted | UpsertOutcome::Replaced)
    }
}

/// Current-row-per-key table
pub struct UpsertStore<E: Upsertable> {
    name: &'static str,
    rows: DashMap<E::Key, E>,
}

impl<E: Upsertable> UpsertStore<E> {
    /// Create an empty store; `name` only labels log lines
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            rows: DashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Merge one record into the table
    pub fn apply(&self, record: E) -> UpsertOutcome {
        let Some(key) = record.key() else {
            debug!(table = self.name, "Dropping record without business key");
            return UpsertOutcome::MissingKey;
        };

        match self.rows.entry(key) {
            Entry::Vacant(slot) => {
                debug!(table = self.name, key = ?slot.key(), "Inserted");
                slot.insert(record);
                UpsertOutcome::Inserted
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get();
                if record.sequence() < current.sequence() {
                    debug!(
                        table = self.name,
                        key = ?slot.key(),
                        incoming = ?record.sequence(),
                        current = ?current.sequence(),
                        "Ignoring out-of-order record"
                    );
                    UpsertOutcome::Stale
                } else if *current == record {
                    UpsertOutcome::Duplicate
                } else {
                    debug!(table = self.name, key = ?slot.key(), "Replaced");
                    slot.insert(record);
                    UpsertOutcome::Replaced
                }
            }
        }
    }

    /// Current row for one key
    pub fn get(&self, key: &E::Key) -> Option<E> {
        self.rows.get(key).map(|row| row.value().clone())
    }

    /// Point-in-time copy of the whole table, ordered by key
    ///
    /// Reflects every `apply` that completed before the call. Consistency is
    /// per key: an `apply` racing with the snapshot is either fully visible
    /// or not at all.
    pub fn snapshot(&self) -> BTreeMap<E::Key, E> {
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

    /// Re-apply previously persisted rows (startup recovery)
    pub fn restore(&self, rows: impl IntoIterator<Item = E>) -> usize {
        rows.into_iter()
            .map(|row| self.apply(row))
            .filter(UpsertOutcome::changed)
            .count()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        key: Option<&'static str>,
        seq: u32,
        payload: String,
    }

    impl Upsertable for Row {
        type Key = &'static str;
        type Sequence = u32;

        fn key(&self) -> Option<&'static str> {
            self.key
        }

        fn sequence(&self) -> u32 {
            self.seq
        }
    }

    fn row(key: &'static str, seq: u32, payload: &str) -> Row {
        Row {
            key: Some(key),
            seq,
            payload: payload.to_string(),
        }
    }

    #[test]
    fn test_insert_then_newer_replaces() {
        let store = UpsertStore::new("test");
        assert_eq!(store.apply(row("K", 1, "a")), UpsertOutcome::Inserted);
        assert_eq!(store.apply(row("K", 2, "b")), UpsertOutcome::Replaced);
        assert_eq!(store.get(&"K").unwrap().payload, "b");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_out_of_order_record_is_ignored() {
        let store = UpsertStore::new("test");
        store.apply(row("K", 5, "five"));
        assert_eq!(store.apply(row("K", 3, "three")), UpsertOutcome::Stale);
        assert_eq!(store.get(&"K").unwrap().seq, 5);
    }

    #[test]
    fn test_equal_sequence_last_applied_wins() {
        let store = UpsertStore::new("test");
        store.apply(row("K", 7, "first"));
        assert_eq!(store.apply(row("K", 7, "second")), UpsertOutcome::Replaced);
        assert_eq!(store.get(&"K").unwrap().payload, "second");
    }

    #[test]
    fn test_exact_duplicate_is_noop() {
        let store = UpsertStore::new("test");
        store.apply(row("K", 7, "same"));
        let before = store.snapshot();
        assert_eq!(store.apply(row("K", 7, "same")), UpsertOutcome::Duplicate);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn test_missing_key_is_excluded() {
        let store: UpsertStore<Row> = UpsertStore::new("test");
        let outcome = store.apply(Row {
            key: None,
            seq: 1,
            payload: "orphan".to_string(),
        });
        assert_eq!(outcome, UpsertOutcome::MissingKey);
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached_from_later_applies() {
        let store = UpsertStore::new("test");
        store.apply(row("A", 1, "a1"));
        let snap = store.snapshot();
        store.apply(row("A", 2, "a2"));
        store.apply(row("B", 1, "b1"));
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[&"A"].payload, "a1");
    }

    #[test]
    fn test_restore_counts_changed_rows() {
        let store = UpsertStore::new("test");
        let restored = store.restore(vec![row("A", 1, "a"), row("A", 1, "a"), row("B", 2, "b")]);
        assert_eq!(restored, 2);
    }

    #[test]
    fn test_concurrent_applies_keep_maximum_per_key() {
        let store = Arc::new(UpsertStore::new("test"));
        let keys = ["A", "B", "C", "D"];

        let handles: Vec<_> = (0..8u32)
            .map(|thread| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..500u32 {
                        let seq = (i * 7919 + thread * 104_729) % 10_000;
                        for key in keys {
                            store.apply(row(key, seq, &format!("{}-{}", thread, seq)));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let max_seq = (0..8u32)
            .flat_map(|t| (0..500u32).map(move |i| (i * 7919 + t * 104_729) % 10_000))
            .max()
            .unwrap();
        for key in keys {
            assert_eq!(store.get(&key).unwrap().seq, max_seq);
        }
    }

    proptest! {
        #[test]
        fn prop_final_row_has_maximum_sequence(seqs in prop::collection::vec(0u32..50, 1..40)) {
            let store = UpsertStore::new("prop");
            for (i, seq) in seqs.iter().enumerate() {
                store.apply(row("K", *seq, &i.to_string()));
            }
            let max = *seqs.iter().max().unwrap();
            prop_assert_eq!(store.get(&"K").unwrap().seq, max);
        }

        #[test]
        fn prop_tie_break_is_last_applied_at_max(seqs in prop::collection::vec(0u32..5, 1..30)) {
            let run = || {
                let store = UpsertStore::new("prop");
                for (i, seq) in seqs.iter().enumerate() {
                    store.apply(row("K", *seq, &i.to_string()));
                }
                store.get(&"K").unwrap()
            };
            let first = run();
            prop_assert_eq!(&first, &run());

            let max = *seqs.iter().max().unwrap();
            let last_at_max = seqs.iter().rposition(|s| *s == max).unwrap();
            prop_assert_eq!(first.payload, last_at_max.to_string());
        }
    }
}
