//! Collaborators the client consumes from the host application.

use crate::error::LocalError;
use async_trait::async_trait;
use shelfsync_engine::merge::select_pending;
use shelfsync_engine::{Book, RecordKey, SyncRecord, Timestamp};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Local persistence of one record kind.
///
/// `book` scopes configs and notes to one book; the library uses `None`.
#[async_trait]
pub trait LocalStore<R: SyncRecord>: Send + Sync {
    async fn read_local(&self, book: Option<&str>) -> Result<Vec<R>, LocalError>;

    /// Local records changed after `watermark`, i.e. the ones to push.
    async fn read_pending(
        &self,
        book: Option<&str>,
        watermark: Timestamp,
    ) -> Result<Vec<R>, LocalError> {
        let records = self.read_local(book).await?;
        Ok(select_pending(&records, watermark))
    }

    /// Replace the local records of `book` with the merged set.
    async fn write_merged(&self, book: Option<&str>, records: Vec<R>) -> Result<(), LocalError>;
}

/// Downloads book content for books resident in the cloud.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, book: &Book) -> Result<(), LocalError>;

    /// Display URL of the cover, derived locally after a download.
    fn cover_url(&self, _book: &Book) -> Option<String> {
        None
    }
}

/// User-facing notifications raised by sync passes.
pub trait Notifier: Send + Sync {
    /// Reading position of `book` moved forward to `fraction` from another
    /// device.
    fn progress_synced(&self, book: &str, fraction: f64);

    /// The credential is missing or was refused.
    fn sign_in_required(&self) {}
}

/// A notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn progress_synced(&self, book: &str, fraction: f64) {
        tracing::info!(book, fraction, "reading progress synced");
    }

    fn sign_in_required(&self) {
        tracing::warn!("sign in required to sync");
    }
}

/// In-process [`LocalStore`], keyed like the server.
#[derive(Debug)]
pub struct MemoryLocalStore<R> {
    records: RwLock<BTreeMap<RecordKey, R>>,
}

impl<R: SyncRecord> MemoryLocalStore<R> {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn with_records(records: impl IntoIterator<Item = R>) -> Self {
        Self {
            records: RwLock::new(records.into_iter().map(|r| (r.key(), r)).collect()),
        }
    }

    /// Insert or replace one record, as a local edit would.
    pub async fn put(&self, record: R) {
        self.records.write().await.insert(record.key(), record);
    }

    pub async fn get(&self, key: &RecordKey) -> Option<R> {
        self.records.read().await.get(key).cloned()
    }
}

impl<R: SyncRecord> Default for MemoryLocalStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: SyncRecord> LocalStore<R> for MemoryLocalStore<R> {
    async fn read_local(&self, book: Option<&str>) -> Result<Vec<R>, LocalError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| book.map_or(true, |b| r.book_hash() == b))
            .cloned()
            .collect())
    }

    async fn write_merged(&self, book: Option<&str>, merged: Vec<R>) -> Result<(), LocalError> {
        let mut records = self.records.write().await;
        records.retain(|_, r| book.is_some_and(|b| r.book_hash() != b));
        records.extend(merged.into_iter().map(|r| (r.key(), r)));
        Ok(())
    }
}
