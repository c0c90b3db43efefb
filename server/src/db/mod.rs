//! Row storage behind the reconciliation endpoint.
//!
//! [`SyncStore`] is kind-erased: it moves [`WireRow`]s and leaves decoding
//! and the last-write-wins decision to the handlers. Every method is scoped
//! to one user.

mod memory;
mod pool;
mod postgres;

pub use memory::MemoryStore;
pub use pool::*;
pub use postgres::PgStore;

use crate::error::StoreError;
use async_trait::async_trait;
use shelfsync_engine::{RecordKey, SyncKind, Timestamp, WireRow};

#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Short name of the back end, reported by `/health`.
    fn backend(&self) -> &'static str {
        "custom"
    }

    /// Rows of `kind` owned by `user_id` with `updated_at > since` or
    /// `deleted_at > since`, optionally restricted to one book.
    async fn changed_since(
        &self,
        user_id: &str,
        kind: SyncKind,
        since: Timestamp,
        book: Option<&str>,
    ) -> Result<Vec<WireRow>, StoreError>;

    /// The stored row with this upsert key.
    async fn find(
        &self,
        user_id: &str,
        kind: SyncKind,
        key: &RecordKey,
    ) -> Result<Option<WireRow>, StoreError>;

    /// Insert `row` unless its key already exists. Returns whether it was
    /// inserted.
    async fn insert_if_absent(&self, row: &WireRow) -> Result<bool, StoreError>;

    /// Overwrite the stored row with the same key.
    async fn update(&self, row: &WireRow) -> Result<(), StoreError>;
}
