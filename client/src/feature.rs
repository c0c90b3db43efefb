//! Synchronized features: one reconciliation pass wired to local state.
//!
//! Each feature reads its pending records, runs a pass through the
//! [`SyncClient`] and merges the authoritative rows back with the policy of
//! its kind.

use crate::client::SyncClient;
use crate::error::{Result, SyncError};
use crate::local::{ContentFetcher, LocalStore, Notifier};
use crate::transport::SyncTransport;
use async_trait::async_trait;
use shelfsync_engine::merge::{merge_books, merge_config, merge_notes, sort_by_location};
use shelfsync_engine::{
    Book, BookConfig, BookHash, BookMerge, BookNote, Clock, SyncKind, SyncOp, Timestamp,
    WatermarkKey,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A feature a scheduler can drive.
#[async_trait]
pub trait FeaturePass: Send + Sync {
    /// Scope of this feature; also its scheduler key.
    fn key(&self) -> WatermarkKey;

    /// A new session begins.
    fn start_session(&self) {}

    async fn run(&self, op: SyncOp) -> Result<()>;
}

fn report(notifier: &dyn Notifier, error: Option<SyncError>) -> Result<()> {
    match error {
        Some(e) => {
            if e.is_auth() {
                notifier.sign_in_required();
            }
            Err(e)
        }
        None => Ok(()),
    }
}

/// The user's library.
pub struct LibraryFeature<T> {
    client: Arc<SyncClient<T>>,
    local: Arc<dyn LocalStore<Book>>,
    fetcher: Arc<dyn ContentFetcher>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl<T: SyncTransport> LibraryFeature<T> {
    pub fn new(
        client: Arc<SyncClient<T>>,
        local: Arc<dyn LocalStore<Book>>,
        fetcher: Arc<dyn ContentFetcher>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            local,
            fetcher,
            notifier,
            clock,
        }
    }

    /// Download `book`'s content. Failures are logged and skipped.
    async fn fetch_into(&self, book: &mut Book, now: Timestamp) -> bool {
        match self.fetcher.fetch(book).await {
            Ok(()) => {
                book.downloaded_at = Some(now);
                book.cover_image_url = self.fetcher.cover_url(book);
                true
            }
            Err(e) => {
                tracing::warn!(book = %book.hash, "content download failed: {}", e);
                false
            }
        }
    }

    async fn merge(&self, remote: Vec<Book>) -> Result<()> {
        let local = self.local.read_local(None).await?;
        let BookMerge {
            mut library,
            adopt,
            download,
        } = merge_books(&local, remote);
        let now = self.clock.now_ms();

        let mut downloaded = 0;
        for hash in &download {
            if let Some(book) = library.iter_mut().find(|b| &b.hash == hash) {
                if self.fetch_into(book, now).await {
                    downloaded += 1;
                }
            }
        }

        let mut adopted = 0;
        for mut book in adopt {
            if book.is_cloud_resident() && !self.fetch_into(&mut book, now).await {
                continue;
            }
            library.push(book);
            adopted += 1;
        }

        tracing::debug!(books = library.len(), adopted, downloaded, "library merged");
        self.local.write_merged(None, library).await?;
        Ok(())
    }
}

#[async_trait]
impl<T: SyncTransport> FeaturePass for LibraryFeature<T> {
    fn key(&self) -> WatermarkKey {
        WatermarkKey::kind(SyncKind::Books)
    }

    async fn run(&self, op: SyncOp) -> Result<()> {
        let pending = if op.pushes() {
            let since = self.client.watermark(SyncKind::Books, None);
            self.local.read_pending(None, since).await?
        } else {
            Vec::new()
        };

        let outcome = self.client.sync_books(&pending, op).await;
        if !outcome.records.is_empty() {
            self.merge(outcome.records).await?;
        }
        report(self.notifier.as_ref(), outcome.error)
    }
}

/// Reading position and preferences of one open book.
///
/// The pulled config is merged once per session; later pulls only refresh
/// the watermark. A merge that fails locally is retried on the next pull.
pub struct ConfigFeature<T> {
    book: BookHash,
    client: Arc<SyncClient<T>>,
    local: Arc<dyn LocalStore<BookConfig>>,
    notifier: Arc<dyn Notifier>,
    merged: AtomicBool,
}

impl<T: SyncTransport> ConfigFeature<T> {
    pub fn new(
        book: impl Into<BookHash>,
        client: Arc<SyncClient<T>>,
        local: Arc<dyn LocalStore<BookConfig>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            book: book.into(),
            client,
            local,
            notifier,
            merged: AtomicBool::new(false),
        }
    }

    /// Whether this session's pulled config was merged.
    pub fn is_merged(&self) -> bool {
        self.merged.load(Ordering::SeqCst)
    }

    /// Push the local config now, e.g. when the book is closed. Pulls first
    /// if this session has not pulled yet.
    pub async fn flush(&self) -> Result<()> {
        if !self.is_merged() {
            self.run(SyncOp::Pull).await?;
        }
        self.run(SyncOp::Push).await
    }

    async fn merge(&self, remote: Vec<BookConfig>) -> Result<()> {
        let Some(remote) = remote.into_iter().find(|c| c.book_hash == self.book) else {
            return Ok(());
        };

        let local = self.local.read_local(Some(&self.book)).await?;
        let (config, advanced_to) = match local.into_iter().next() {
            Some(local) => {
                let merge = merge_config(&local, &remote);
                (merge.config, merge.advanced_to)
            }
            None => (remote, None),
        };
        self.local.write_merged(Some(&self.book), vec![config]).await?;
        if let Some(fraction) = advanced_to {
            self.notifier.progress_synced(&self.book, fraction);
        }
        Ok(())
    }
}

#[async_trait]
impl<T: SyncTransport> FeaturePass for ConfigFeature<T> {
    fn key(&self) -> WatermarkKey {
        WatermarkKey::book(SyncKind::Configs, self.book.clone())
    }

    fn start_session(&self) {
        self.merged.store(false, Ordering::SeqCst);
    }

    async fn run(&self, op: SyncOp) -> Result<()> {
        let pending = if op.pushes() {
            let since = self.client.watermark(SyncKind::Configs, Some(&self.book));
            self.local.read_pending(Some(&self.book), since).await?
        } else {
            Vec::new()
        };

        let outcome = self.client.sync_config(&self.book, &pending, op).await;
        if outcome.pulled && !self.is_merged() {
            if let Err(e) = self.merge(outcome.records).await {
                // next pull re-fetches the rows this one consumed
                self.client.repull(SyncKind::Configs, Some(&self.book));
                return Err(e);
            }
            self.merged.store(true, Ordering::SeqCst);
        }
        report(self.notifier.as_ref(), outcome.error)
    }
}

/// Bookmarks, annotations and excerpts of one book.
pub struct NotesFeature<T> {
    book: BookHash,
    client: Arc<SyncClient<T>>,
    local: Arc<dyn LocalStore<BookNote>>,
    notifier: Arc<dyn Notifier>,
}

impl<T: SyncTransport> NotesFeature<T> {
    pub fn new(
        book: impl Into<BookHash>,
        client: Arc<SyncClient<T>>,
        local: Arc<dyn LocalStore<BookNote>>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            book: book.into(),
            client,
            local,
            notifier,
        }
    }
}

#[async_trait]
impl<T: SyncTransport> FeaturePass for NotesFeature<T> {
    fn key(&self) -> WatermarkKey {
        WatermarkKey::book(SyncKind::Notes, self.book.clone())
    }

    async fn run(&self, op: SyncOp) -> Result<()> {
        let pending = if op.pushes() {
            let since = self.client.watermark(SyncKind::Notes, Some(&self.book));
            self.local.read_pending(Some(&self.book), since).await?
        } else {
            Vec::new()
        };

        let outcome = self.client.sync_notes(&self.book, &pending, op).await;
        if !outcome.records.is_empty() {
            let local = self.local.read_local(Some(&self.book)).await?;
            let mut merged = merge_notes(&local, outcome.records, &self.book);
            sort_by_location(&mut merged);
            self.local.write_merged(Some(&self.book), merged).await?;
        }
        report(self.notifier.as_ref(), outcome.error)
    }
}
