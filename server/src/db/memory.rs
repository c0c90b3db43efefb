//! In-memory [`SyncStore`], used when no database is configured.

use super::SyncStore;
use crate::error::StoreError;
use async_trait::async_trait;
use shelfsync_engine::{RecordKey, SyncKind, Timestamp, WireRow};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

type RowKey = (String, SyncKind, RecordKey);

#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<RowKey, WireRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows across all users.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    fn key_of(row: &WireRow) -> RowKey {
        (row.user_id().to_string(), row.kind(), row.key())
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn changed_since(
        &self,
        user_id: &str,
        kind: SyncKind,
        since: Timestamp,
        book: Option<&str>,
    ) -> Result<Vec<WireRow>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|((owner, k, key), _)| {
                owner == user_id && *k == kind && book.map_or(true, |b| key.book_hash == b)
            })
            .filter(|(_, row)| row.effective_at() > since)
            .map(|(_, row)| row.clone())
            .collect())
    }

    async fn find(
        &self,
        user_id: &str,
        kind: SyncKind,
        key: &RecordKey,
    ) -> Result<Option<WireRow>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&(user_id.to_string(), kind, key.clone()))
            .cloned())
    }

    async fn insert_if_absent(&self, row: &WireRow) -> Result<bool, StoreError> {
        let mut rows = self.rows.write().await;
        match rows.entry(Self::key_of(row)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(row.clone());
                Ok(true)
            }
        }
    }

    async fn update(&self, row: &WireRow) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        rows.insert(Self::key_of(row), row.clone());
        Ok(())
    }
}
