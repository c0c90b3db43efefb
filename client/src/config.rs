//! Client configuration.

use shelfsync_engine::{SyncKind, DEFAULT_LOOK_BACK};
use std::time::Duration;

/// Settings of one [`SyncClient`](crate::SyncClient) and its schedulers.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server root, e.g. `https://sync.example.com`. `/sync` is appended.
    pub base_url: String,
    /// Debounce interval of the library scheduler
    pub books_interval: Duration,
    /// Debounce interval of per-book config schedulers
    pub configs_interval: Duration,
    /// Debounce interval of per-book notes schedulers
    pub notes_interval: Duration,
    /// How far the first pull of a session is rewound
    pub look_back: Duration,
    /// Timeout of a single HTTP request
    pub request_timeout: Duration,
}

impl SyncConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Debounce interval for schedulers of `kind`.
    pub fn interval(&self, kind: SyncKind) -> Duration {
        match kind {
            SyncKind::Books => self.books_interval,
            SyncKind::Configs => self.configs_interval,
            SyncKind::Notes => self.notes_interval,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".to_string(),
            books_interval: Duration::from_secs(10),
            configs_interval: Duration::from_secs(60),
            notes_interval: Duration::from_secs(10),
            look_back: DEFAULT_LOOK_BACK,
            request_timeout: Duration::from_secs(30),
        }
    }
}
