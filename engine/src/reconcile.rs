//! Server-side last-write-wins decision for a pushed record.
//!
//! # Algorithm
//!
//! 1. Look up the stored row by upsert key, scoped to the caller.
//! 2. Absent: insert the pushed record.
//! 3. Present: compare `effective_at = max(updated_at, deleted_at)` of the
//!    pushed and stored copies. The pushed copy wins only if it is strictly
//!    newer; ties keep the stored row.
//! 4. Whenever a row is written its `updated_at` is replaced with the
//!    server's clock. The client's asserted time only takes part in the
//!    comparison, so a client clock running ahead always wins comparisons
//!    while the persisted stamp stays server-minted.

use crate::record::SyncRecord;
use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// Outcome of comparing a pushed record against the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Decision {
    /// No stored row exists.
    Insert,
    /// The pushed copy is strictly newer and replaces the stored row.
    ClientWins,
    /// The stored row is kept and returned unchanged.
    StoredWins,
}

impl Decision {
    /// Whether the pushed record will be written.
    pub fn writes(&self) -> bool {
        !matches!(self, Decision::StoredWins)
    }

    /// The server-minted `updated_at` for a written row.
    pub fn stamp(&self, now: Timestamp) -> Option<Timestamp> {
        self.writes().then_some(now)
    }
}

/// Decide on effective timestamps alone.
pub fn decide_effective(client: Timestamp, stored: Option<Timestamp>) -> Decision {
    match stored {
        None => Decision::Insert,
        Some(stored) if client > stored => Decision::ClientWins,
        Some(_) => Decision::StoredWins,
    }
}

/// Decide between a pushed record and the stored copy with the same key.
pub fn decide<R: SyncRecord>(client: &R, stored: Option<&R>) -> Decision {
    decide_effective(client.effective_at(), stored.map(SyncRecord::effective_at))
}

/// Apply [`decide`] and produce the authoritative copy.
///
/// A written copy is stamped with `now`. The returned record is what the
/// caller persists (when `writes()`) and reports back to the client.
pub fn resolve<R: SyncRecord>(mut client: R, stored: Option<R>, now: Timestamp) -> (Decision, R) {
    let decision = decide(&client, stored.as_ref());
    match (decision, stored) {
        (Decision::StoredWins, Some(stored)) => (decision, stored),
        _ => {
            client.touch(now);
            (decision, client)
        }
    }
}

/// Per-batch counters for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileStats {
    pub inserted: usize,
    pub updated: usize,
    pub kept: usize,
    pub rejected: usize,
}

impl ReconcileStats {
    pub fn record(&mut self, decision: Decision) {
        match decision {
            Decision::Insert => self.inserted += 1,
            Decision::ClientWins => self.updated += 1,
            Decision::StoredWins => self.kept += 1,
        }
    }

    pub fn reject(&mut self) {
        self.rejected += 1;
    }

    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.kept + self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Book, BookFormat, BookNote, NoteKind};

    fn book(title: &str, updated_at: Timestamp) -> Book {
        Book::new("abc", BookFormat::Epub, title, "Anon", updated_at)
    }

    #[test]
    fn absent_row_is_inserted_with_server_time() {
        let (decision, row) = resolve(book("Foo", 100), None, 1_000);
        assert_eq!(decision, Decision::Insert);
        assert_eq!(row.title, "Foo");
        assert_eq!(row.updated_at, 1_000);
        assert_eq!(row.created_at, 100);
    }

    #[test]
    fn foo_bar_baz() {
        let (_, stored) = resolve(book("Foo", 100), None, 1_000);

        // Older asserted time: stored row comes back unchanged.
        let (decision, row) = resolve(book("Bar", 50), Some(stored.clone()), 2_000);
        assert_eq!(decision, Decision::StoredWins);
        assert_eq!(row, stored);

        // Newer than the server-minted stamp.
        let (decision, row) = resolve(book("Baz", 2_500), Some(stored), 3_000);
        assert_eq!(decision, Decision::ClientWins);
        assert_eq!(row.title, "Baz");
        assert_eq!(row.updated_at, 3_000);
    }

    #[test]
    fn ties_keep_stored() {
        let stored = book("Foo", 500);
        assert_eq!(decide(&book("Bar", 500), Some(&stored)), Decision::StoredWins);
    }

    #[test]
    fn tombstone_counts_as_a_write() {
        let stored = BookNote::new("abc", "n1", NoteKind::Bookmark, "epubcfi(/6/2)", 500);
        let mut client = stored.clone();
        client.updated_at = 400;
        client.lifecycle = crate::record::Lifecycle::Deleted(600);

        let (decision, row) = resolve(client, Some(stored), 9_000);
        assert_eq!(decision, Decision::ClientWins);
        assert!(row.is_deleted());
        assert_eq!(row.deleted_at(), Some(600));
        assert_eq!(row.updated_at, 9_000);
    }

    #[test]
    fn skewed_client_clock_still_wins() {
        // Preserved behaviour: a far-future asserted time beats any stored stamp.
        let (_, stored) = resolve(book("Foo", 100), None, 1_000);
        let (decision, row) = resolve(book("Future", u64::MAX / 2), Some(stored), 2_000);
        assert_eq!(decision, Decision::ClientWins);
        assert_eq!(row.updated_at, 2_000);
    }

    #[test]
    fn stamp_only_for_writes() {
        assert_eq!(Decision::Insert.stamp(7), Some(7));
        assert_eq!(Decision::ClientWins.stamp(7), Some(7));
        assert_eq!(Decision::StoredWins.stamp(7), None);
    }

    #[test]
    fn stats_count_decisions() {
        let mut stats = ReconcileStats::default();
        stats.record(Decision::Insert);
        stats.record(Decision::StoredWins);
        stats.record(Decision::StoredWins);
        stats.reject();
        assert_eq!(stats.kept, 2);
        assert_eq!(stats.total(), 4);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_pushing_twice_is_idempotent(
                client_at in 0u64..10_000,
                now in 10_000u64..20_000,
                later in 20_000u64..30_000,
            ) {
                let (_, first) = resolve(book("Foo", client_at), None, now);
                let (decision, second) = resolve(book("Foo", client_at), Some(first.clone()), later);
                prop_assert_eq!(decision, Decision::StoredWins);
                prop_assert_eq!(second, first);
            }

            #[test]
            fn prop_newer_write_wins_regardless_of_order(
                t1 in 0u64..5_000,
                gap in 1u64..5_000,
            ) {
                let t2 = t1 + gap;
                let a = book("first", t1);
                let b = book("second", t2);

                // Stored copies as persisted by an earlier push (effective time kept).
                prop_assert_eq!(decide(&b, Some(&a)), Decision::ClientWins);
                prop_assert_eq!(decide(&a, Some(&b)), Decision::StoredWins);
            }

            #[test]
            fn prop_decision_matches_effective_order(
                client in 0u64..1_000,
                stored in proptest::option::of(0u64..1_000),
            ) {
                let decision = decide_effective(client, stored);
                match stored {
                    None => prop_assert_eq!(decision, Decision::Insert),
                    Some(s) if client > s => prop_assert_eq!(decision, Decision::ClientWins),
                    Some(_) => prop_assert_eq!(decision, Decision::StoredWins),
                }
            }
        }
    }
}
