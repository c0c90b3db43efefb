//! Push handler - reconciles incoming rows against the store.
//!
//! Each row goes through its own pipeline, so one bad row never affects the
//! others in the batch:
//!
//! 1. decode the wire row into a record (fail closed);
//! 2. read the stored row with the same key for this user;
//! 3. last-write-wins decision, stamping written rows with server time;
//! 4. insert-if-absent or update. An insert that loses a race against a
//!    concurrent push re-reads the row and decides again.

use crate::db::SyncStore;
use crate::error::StoreError;
use shelfsync_engine::reconcile::resolve;
use shelfsync_engine::{
    Book, BookConfig, BookNote, Clock, Decision, RawSyncPayload, RecordKey, ReconcileStats,
    RejectedRow, SyncKind, SyncPayload, Transform, WireShape,
};

/// Attempts per row before giving up on a contended key.
const MAX_ATTEMPTS: usize = 3;

/// Reconcile every row of `request` for `user_id`.
///
/// The response holds the authoritative copy of each accepted row and a
/// `rejected` entry for each row that could not be reconciled.
pub async fn handle_push(
    store: &dyn SyncStore,
    clock: &dyn Clock,
    user_id: &str,
    request: RawSyncPayload,
) -> SyncPayload {
    let mut request = request.decode_request();
    let mut response = SyncPayload::default();
    let mut stats = ReconcileStats::default();

    for rejected in std::mem::take(&mut request.rejected) {
        tracing::warn!(
            user = user_id,
            kind = %rejected.kind,
            key = %rejected.key,
            reason = %rejected.reason,
            "malformed row"
        );
        stats.reject();
        response.rejected.push(rejected);
    }

    reconcile_kind::<Book>(store, clock, user_id, request.take_rows(), &mut response, &mut stats)
        .await;
    reconcile_kind::<BookConfig>(store, clock, user_id, request.take_rows(), &mut response, &mut stats)
        .await;
    reconcile_kind::<BookNote>(store, clock, user_id, request.take_rows(), &mut response, &mut stats)
        .await;

    tracing::info!(
        user = user_id,
        inserted = stats.inserted,
        updated = stats.updated,
        kept = stats.kept,
        rejected = stats.rejected,
        "push reconciled"
    );
    response
}

async fn reconcile_kind<R: Transform>(
    store: &dyn SyncStore,
    clock: &dyn Clock,
    user_id: &str,
    rows: Vec<R::Wire>,
    response: &mut SyncPayload,
    stats: &mut ReconcileStats,
) {
    for row in rows {
        match reconcile_row::<R>(store, clock, user_id, row).await {
            Ok((decision, authoritative)) => {
                stats.record(decision);
                R::Wire::slot_mut(response).push(authoritative);
            }
            Err(rejected) => {
                tracing::warn!(
                    user = user_id,
                    kind = %rejected.kind,
                    key = %rejected.key,
                    reason = %rejected.reason,
                    "row rejected"
                );
                stats.reject();
                response.rejected.push(rejected);
            }
        }
    }
}

fn rejection(kind: SyncKind, key: &RecordKey, reason: impl ToString) -> RejectedRow {
    RejectedRow {
        kind,
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn store_failure(kind: SyncKind, key: &RecordKey, error: StoreError) -> RejectedRow {
    tracing::error!(%kind, %key, "store failure: {:?}", error);
    rejection(kind, key, "store failure")
}

async fn reconcile_row<R: Transform>(
    store: &dyn SyncStore,
    clock: &dyn Clock,
    user_id: &str,
    row: R::Wire,
) -> Result<(Decision, R::Wire), RejectedRow> {
    let key = row.key();
    let incoming = R::from_wire(row).map_err(|e| rejection(R::KIND, &key, e))?;

    for _ in 0..MAX_ATTEMPTS {
        let stored = load::<R>(store, user_id, &key).await?;
        let (decision, winner) = resolve(incoming.clone(), stored, clock.now_ms());
        let authoritative = winner
            .to_wire(user_id)
            .map_err(|e| rejection(R::KIND, &key, e))?;

        match decision {
            Decision::StoredWins => return Ok((decision, authoritative)),
            Decision::ClientWins => {
                store
                    .update(&authoritative.clone().into_row())
                    .await
                    .map_err(|e| store_failure(R::KIND, &key, e))?;
                return Ok((decision, authoritative));
            }
            Decision::Insert => {
                let inserted = store
                    .insert_if_absent(&authoritative.clone().into_row())
                    .await
                    .map_err(|e| store_failure(R::KIND, &key, e))?;
                if inserted {
                    return Ok((decision, authoritative));
                }
                tracing::debug!(kind = %R::KIND, %key, "insert lost a race, re-reading");
            }
        }
    }

    Err(rejection(R::KIND, &key, "key is contended, retry later"))
}

async fn load<R: Transform>(
    store: &dyn SyncStore,
    user_id: &str,
    key: &RecordKey,
) -> Result<Option<R>, RejectedRow> {
    let Some(row) = store
        .find(user_id, R::KIND, key)
        .await
        .map_err(|e| store_failure(R::KIND, key, e))?
    else {
        return Ok(None);
    };

    let wire = R::Wire::from_row(row).ok_or_else(|| {
        store_failure(
            R::KIND,
            key,
            StoreError::Corrupt("row of another kind".to_string()),
        )
    })?;
    R::from_wire(wire)
        .map(Some)
        .map_err(|e| store_failure(R::KIND, key, StoreError::Corrupt(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;
    use shelfsync_engine::{BookFormat, ManualClock, WireRow};
    use serde_json::json;

    fn push_body(rows: serde_json::Value) -> RawSyncPayload {
        serde_json::from_value(rows).unwrap()
    }

    fn book_json(title: &str, updated_at: &str) -> serde_json::Value {
        json!({
            "user_id": "someone-else",
            "book_hash": "abc",
            "format": "EPUB",
            "title": title,
            "author": "Anon",
            "created_at": "2024-01-01T00:00:00.000Z",
            "updated_at": updated_at,
            "deleted_at": null
        })
    }

    #[tokio::test]
    async fn owner_is_always_the_caller() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(1_000_000);
        let body = push_body(json!({ "books": [book_json("Foo", "2024-01-01T00:00:00.100Z")] }));

        let response = handle_push(&store, &clock, "user-1", body).await;
        assert_eq!(response.books.len(), 1);
        assert_eq!(response.books[0].user_id, "user-1");

        let rows = store
            .changed_since("someone-else", SyncKind::Books, 0, None)
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn bad_rows_do_not_fail_the_batch() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(1_000_000);
        let mut bad_format = book_json("Foo", "2024-01-01T00:00:00.100Z");
        bad_format["format"] = json!("DOCX");
        bad_format["book_hash"] = json!("def");
        let body = push_body(json!({
            "books": [bad_format, book_json("Foo", "2024-01-01T00:00:00.100Z")],
            "notes": [{ "book_hash": "abc" }]
        }));

        let response = handle_push(&store, &clock, "user-1", body).await;
        assert_eq!(response.books.len(), 1);
        assert_eq!(response.rejected.len(), 2);
        assert!(response
            .rejected
            .iter()
            .any(|r| r.kind == SyncKind::Books && r.key == "def"));
        assert!(response.rejected.iter().any(|r| r.kind == SyncKind::Notes));
    }

    #[tokio::test]
    async fn client_supplied_rejections_are_dropped() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(1_000_000);
        let body = push_body(json!({
            "books": [book_json("Foo", "2024-01-01T00:00:00.100Z")],
            "rejected": [{ "type": "books", "key": "forged", "reason": "client-supplied" }]
        }));

        let response = handle_push(&store, &clock, "user-1", body).await;
        assert_eq!(response.books.len(), 1);
        assert!(response.rejected.is_empty());
    }

    #[tokio::test]
    async fn lost_insert_race_falls_back_to_update() {
        // A store that reports "absent" once, then shows the concurrent row.
        struct RacyStore {
            inner: MemoryStore,
            hidden: std::sync::atomic::AtomicBool,
        }

        #[async_trait::async_trait]
        impl SyncStore for RacyStore {
            async fn changed_since(
                &self,
                user_id: &str,
                kind: SyncKind,
                since: u64,
                book: Option<&str>,
            ) -> Result<Vec<WireRow>, StoreError> {
                self.inner.changed_since(user_id, kind, since, book).await
            }

            async fn find(
                &self,
                user_id: &str,
                kind: SyncKind,
                key: &RecordKey,
            ) -> Result<Option<WireRow>, StoreError> {
                if self.hidden.swap(false, std::sync::atomic::Ordering::SeqCst) {
                    return Ok(None);
                }
                self.inner.find(user_id, kind, key).await
            }

            async fn insert_if_absent(&self, row: &WireRow) -> Result<bool, StoreError> {
                self.inner.insert_if_absent(row).await
            }

            async fn update(&self, row: &WireRow) -> Result<(), StoreError> {
                self.inner.update(row).await
            }
        }

        let store = RacyStore {
            inner: MemoryStore::new(),
            hidden: std::sync::atomic::AtomicBool::new(true),
        };
        let concurrent = Book::new("abc", BookFormat::Epub, "Other device", "Anon", 10);
        store
            .inner
            .update(&concurrent.to_wire("user-1").unwrap().into())
            .await
            .unwrap();

        let clock = ManualClock::new(1_000_000);
        let body = push_body(json!({ "books": [book_json("Mine", "2024-01-01T00:00:00.100Z")] }));
        let response = handle_push(&store, &clock, "user-1", body).await;

        assert!(response.rejected.is_empty());
        assert_eq!(response.books[0].title, "Mine");
        let stored = store
            .inner
            .find("user-1", SyncKind::Books, &RecordKey::book("abc"))
            .await
            .unwrap()
            .unwrap();
        match stored {
            WireRow::Book(b) => assert_eq!(b.title, "Mine"),
            other => panic!("unexpected row {other:?}"),
        }
    }
}
