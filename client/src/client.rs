//! The sync client: watermark-based pulls and pushes over a transport.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::transport::SyncTransport;
use shelfsync_engine::watermark::max_observed;
use shelfsync_engine::{
    Book, BookConfig, BookNote, PullQuery, SyncKind, SyncOp, SyncPayload, Timestamp, Transform,
    WatermarkKey, WatermarkStore, Watermarks, WireShape,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Result of one reconciliation pass of a feature.
///
/// `records` holds the authoritative rows the pass obtained: the pulled
/// rows when a pull succeeded, otherwise the rows the push returned.
#[derive(Debug)]
pub struct SyncOutcome<R> {
    pub records: Vec<R>,
    /// Whether `records` came from a successful pull.
    pub pulled: bool,
    pub error: Option<SyncError>,
}

impl<R> SyncOutcome<R> {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

impl<R> Default for SyncOutcome<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            pulled: false,
            error: None,
        }
    }
}

#[derive(Debug)]
struct SessionState {
    watermarks: Watermarks,
    /// Keys already pulled this session.
    pulled: HashSet<WatermarkKey>,
}

/// Pulls and pushes records of one user.
pub struct SyncClient<T> {
    transport: T,
    state: Mutex<SessionState>,
}

impl<T: SyncTransport> SyncClient<T> {
    pub fn new(transport: T, watermarks: Watermarks) -> Self {
        Self {
            transport,
            state: Mutex::new(SessionState {
                watermarks,
                pulled: HashSet::new(),
            }),
        }
    }

    /// Client whose watermarks persist through `store`.
    pub fn with_store(transport: T, config: &SyncConfig, store: Arc<dyn WatermarkStore>) -> Self {
        Self::new(transport, Watermarks::new(store, config.look_back))
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a new session: the next pull of every key is rewound by the
    /// look-back window again.
    pub fn start_session(&self) {
        self.state().pulled.clear();
    }

    /// Rewind the next pull of `kind`/`book` by the look-back window again,
    /// as at session start. For pulled rows that could not be applied.
    pub fn repull(&self, kind: SyncKind, book: Option<&str>) {
        self.state().pulled.remove(&watermark_key(kind, book));
    }

    /// Last observed server time for `kind`, scoped to `book` when given.
    pub fn watermark(&self, kind: SyncKind, book: Option<&str>) -> Timestamp {
        self.state().watermarks.get(&watermark_key(kind, book)).get()
    }

    /// Pull rows of `kind` changed since the watermark.
    ///
    /// The watermark advances to the newest row only when the pull succeeds.
    pub async fn pull(&self, kind: SyncKind, book: Option<&str>) -> Result<SyncPayload> {
        let key = watermark_key(kind, book);
        let since = {
            let mut state = self.state();
            let initial = !state.pulled.contains(&key);
            state.watermarks.pull_since(&key, initial)
        };

        let query = PullQuery::new(since, kind).scoped(book.map(str::to_string));
        let payload = self.transport.pull(&query).await?;
        log_rejected("pull", &payload);

        let newest = max_observed(&payload.books)
            .max(max_observed(&payload.configs))
            .max(max_observed(&payload.notes));
        let mut state = self.state();
        state.pulled.insert(key.clone());
        if let Some(newest) = newest {
            if state.watermarks.advance(&key, newest) {
                tracing::debug!(%key, watermark = newest, "watermark advanced");
            }
        }
        tracing::debug!(%key, since, rows = payload.len(), "pulled");

        Ok(payload)
    }

    /// Push rows and return the server's authoritative copies.
    pub async fn push(&self, payload: &SyncPayload) -> Result<SyncPayload> {
        if payload.is_empty() {
            return Ok(SyncPayload::default());
        }
        let response = self.transport.push(payload).await?;
        log_rejected("push", &response);
        tracing::debug!(sent = payload.len(), accepted = response.len(), "pushed");
        Ok(response)
    }

    /// Pull and decode records of `R`. Undecodable rows are skipped.
    pub async fn pull_records<R: Transform>(&self, book: Option<&str>) -> Result<Vec<R>> {
        let mut payload = self.pull(R::KIND, book).await?;
        Ok(decode_rows(payload.take_rows::<R::Wire>()))
    }

    /// Push `records` and decode the authoritative copies.
    pub async fn push_records<R: Transform>(&self, records: &[R]) -> Result<Vec<R>> {
        // The server fills in the owner from the credential.
        let payload = records
            .iter()
            .map(|r| r.to_wire("").map(|row| row.into_row()))
            .collect::<shelfsync_engine::Result<SyncPayload>>()?;
        let mut response = self.push(&payload).await?;
        Ok(decode_rows(response.take_rows::<R::Wire>()))
    }

    /// Run one pass for records of `R`: push `pending` if `op` pushes, then
    /// pull if `op` pulls. A failed push does not prevent the pull.
    pub async fn sync<R: Transform>(
        &self,
        book: Option<&str>,
        pending: &[R],
        op: SyncOp,
    ) -> SyncOutcome<R> {
        let mut outcome = SyncOutcome::default();

        if op.pushes() && !pending.is_empty() {
            match self.push_records(pending).await {
                Ok(records) => outcome.records = records,
                Err(e) => {
                    tracing::warn!(kind = %R::KIND, book = book.unwrap_or("*"), "push failed: {}", e);
                    outcome.error = Some(e);
                }
            }
        }

        if op.pulls() {
            match self.pull_records(book).await {
                Ok(records) => {
                    outcome.records = records;
                    outcome.pulled = true;
                }
                Err(e) => {
                    tracing::warn!(kind = %R::KIND, book = book.unwrap_or("*"), "pull failed: {}", e);
                    outcome.error.get_or_insert(e);
                }
            }
        }

        outcome
    }

    pub async fn sync_books(&self, pending: &[Book], op: SyncOp) -> SyncOutcome<Book> {
        self.sync(None, pending, op).await
    }

    pub async fn sync_config(
        &self,
        book: &str,
        pending: &[BookConfig],
        op: SyncOp,
    ) -> SyncOutcome<BookConfig> {
        self.sync(Some(book), pending, op).await
    }

    pub async fn sync_notes(
        &self,
        book: &str,
        pending: &[BookNote],
        op: SyncOp,
    ) -> SyncOutcome<BookNote> {
        self.sync(Some(book), pending, op).await
    }
}

impl<T> std::fmt::Debug for SyncClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient").finish_non_exhaustive()
    }
}

fn watermark_key(kind: SyncKind, book: Option<&str>) -> WatermarkKey {
    match book {
        Some(book) => WatermarkKey::book(kind, book),
        None => WatermarkKey::kind(kind),
    }
}

fn decode_rows<R: Transform>(rows: Vec<R::Wire>) -> Vec<R> {
    rows.into_iter()
        .filter_map(|row| {
            let key = row.key();
            match R::from_wire(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    tracing::warn!(kind = %R::KIND, %key, "skipping row: {}", e);
                    None
                }
            }
        })
        .collect()
}

fn log_rejected(call: &str, payload: &SyncPayload) {
    for rejected in &payload.rejected {
        tracing::warn!(
            call,
            kind = %rejected.kind,
            key = %rejected.key,
            reason = %rejected.reason,
            "row rejected"
        );
    }
}
