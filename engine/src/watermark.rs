//! Pull watermarks.
//!
//! A watermark is the time below which a client has already observed every
//! change of one entity kind, optionally scoped to one book. It only moves
//! forward, and only from rows a successful pull returned.
//!
//! Per-book keys fall back to the per-kind key when they have never been
//! set, so the first scoped pull after a library-wide one does not start
//! from zero.

use crate::record::SyncKind;
use crate::wire::WireShape;
use crate::{BookHash, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default rewind applied to the first pull of a session.
pub const DEFAULT_LOOK_BACK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A monotonic timestamp.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Watermark(Timestamp);

impl Watermark {
    pub fn new(at: Timestamp) -> Self {
        Self(at)
    }

    pub fn get(&self) -> Timestamp {
        self.0
    }

    /// Move to `to` if it is later. Returns whether the value changed.
    pub fn advance(&mut self, to: Timestamp) -> bool {
        if to > self.0 {
            self.0 = to;
            true
        } else {
            false
        }
    }

    /// The value rewound by `look_back`, saturating at zero.
    pub fn rewound(&self, look_back: Duration) -> Timestamp {
        let ms = u64::try_from(look_back.as_millis()).unwrap_or(u64::MAX);
        self.0.saturating_sub(ms)
    }
}

/// Largest `max(updated_at, deleted_at)` among `rows`.
pub fn max_observed<W: WireShape>(rows: &[W]) -> Option<Timestamp> {
    rows.iter().map(WireShape::effective_at).max()
}

/// Identifies one watermark.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WatermarkKey {
    pub kind: SyncKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book: Option<BookHash>,
}

impl WatermarkKey {
    pub fn kind(kind: SyncKind) -> Self {
        Self { kind, book: None }
    }

    pub fn book(kind: SyncKind, book: impl Into<BookHash>) -> Self {
        Self {
            kind,
            book: Some(book.into()),
        }
    }

    /// The per-kind key a per-book key falls back to.
    pub fn fallback(&self) -> Option<WatermarkKey> {
        self.book.as_ref().map(|_| WatermarkKey::kind(self.kind))
    }
}

impl fmt::Display for WatermarkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.book {
            Some(book) => write!(f, "{}:{}", self.kind, book),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Persistence for watermarks across sessions.
pub trait WatermarkStore: Send + Sync {
    fn load(&self, key: &WatermarkKey) -> Option<Timestamp>;
    fn save(&self, key: &WatermarkKey, value: Timestamp);
}

/// Process-local [`WatermarkStore`].
#[derive(Debug, Default)]
pub struct MemoryWatermarkStore {
    values: Mutex<HashMap<WatermarkKey, Timestamp>>,
}

impl MemoryWatermarkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatermarkStore for MemoryWatermarkStore {
    fn load(&self, key: &WatermarkKey) -> Option<Timestamp> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(key).copied()
    }

    fn save(&self, key: &WatermarkKey, value: Timestamp) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let slot = values.entry(key.clone()).or_default();
        *slot = (*slot).max(value);
    }
}

/// Watermark state of one client, backed by a [`WatermarkStore`].
pub struct Watermarks {
    store: Arc<dyn WatermarkStore>,
    look_back: Duration,
    values: HashMap<WatermarkKey, Watermark>,
}

impl Watermarks {
    pub fn new(store: Arc<dyn WatermarkStore>, look_back: Duration) -> Self {
        Self {
            store,
            look_back,
            values: HashMap::new(),
        }
    }

    /// Watermarks that are not persisted beyond this process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryWatermarkStore::new()), DEFAULT_LOOK_BACK)
    }

    fn own(&mut self, key: &WatermarkKey) -> Option<Watermark> {
        if let Some(w) = self.values.get(key) {
            return Some(*w);
        }
        let loaded = self.store.load(key).map(Watermark::new)?;
        self.values.insert(key.clone(), loaded);
        Some(loaded)
    }

    /// Current value for `key`, falling back to the per-kind value.
    pub fn get(&mut self, key: &WatermarkKey) -> Watermark {
        if let Some(w) = self.own(key) {
            return w;
        }
        key.fallback()
            .and_then(|parent| self.own(&parent))
            .unwrap_or_default()
    }

    /// The `since` to send with a pull. The first pull of a session is
    /// rewound by the look-back window.
    pub fn pull_since(&mut self, key: &WatermarkKey, initial: bool) -> Timestamp {
        let current = self.get(key);
        if initial {
            current.rewound(self.look_back)
        } else {
            current.get()
        }
    }

    /// Advance `key` and persist it if it moved.
    pub fn advance(&mut self, key: &WatermarkKey, to: Timestamp) -> bool {
        let mut current = self.get(key);
        if !current.advance(to) {
            return false;
        }
        self.values.insert(key.clone(), current);
        self.store.save(key, current.get());
        true
    }
}

impl fmt::Debug for Watermarks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watermarks")
            .field("look_back", &self.look_back)
            .field("values", &self.values)
            .finish()
    }
}
