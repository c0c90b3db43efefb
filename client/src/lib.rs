//! # Shelfsync Client
//!
//! Client side of shelfsync: pulls and pushes books, per-book configs and
//! notes against the reconciliation endpoint, merges the authoritative rows
//! into local state and schedules passes with a debounce per feature.
//!
//! ## Pieces
//!
//! - [`SyncTransport`] / [`HttpTransport`]: one round trip to `/sync`.
//! - [`SyncClient`]: watermark bookkeeping, `sync_books` / `sync_config` /
//!   `sync_notes` returning a [`SyncOutcome`].
//! - [`LocalStore`], [`ContentFetcher`], [`Notifier`]: collaborators
//!   supplied by the host application.
//! - [`LibraryFeature`], [`ConfigFeature`], [`NotesFeature`]: one pass of a
//!   feature, merge included.
//! - [`SyncScheduler`] / [`SchedulerRegistry`]: debounced, independent
//!   schedulers per feature.
//!
//! ## Example
//!
//! ```no_run
//! use shelfsync_client::{
//!     HttpTransport, LibraryFeature, LogNotifier, MemoryLocalStore, SchedulerRegistry,
//!     StaticToken, SyncClient, SyncConfig,
//! };
//! use shelfsync_engine::{Book, MemoryWatermarkStore, SyncKind, SystemClock, WatermarkKey};
//! use std::sync::Arc;
//!
//! # struct NoDownloads;
//! # #[async_trait::async_trait]
//! # impl shelfsync_client::ContentFetcher for NoDownloads {
//! #     async fn fetch(&self, _: &Book) -> Result<(), shelfsync_client::LocalError> { Ok(()) }
//! # }
//! # async fn run() -> shelfsync_client::Result<()> {
//! let config = SyncConfig::new("https://sync.example.com");
//! let transport = HttpTransport::new(&config, Arc::new(StaticToken::new("jwt")))?;
//! let client = Arc::new(SyncClient::with_store(
//!     transport,
//!     &config,
//!     Arc::new(MemoryWatermarkStore::new()),
//! ));
//!
//! let library = LibraryFeature::new(
//!     client,
//!     Arc::new(MemoryLocalStore::<Book>::new()),
//!     Arc::new(NoDownloads),
//!     Arc::new(LogNotifier),
//!     Arc::new(SystemClock),
//! );
//!
//! let registry = SchedulerRegistry::new();
//! registry.register(Arc::new(library), config.interval(SyncKind::Books));
//! registry.mutation(&WatermarkKey::kind(SyncKind::Books));
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
mod feature;
mod local;
mod scheduler;
mod transport;

#[cfg(test)]
mod testing;

pub use client::{SyncClient, SyncOutcome};
pub use config::SyncConfig;
pub use error::{LocalError, Result, SyncError};
pub use feature::{ConfigFeature, FeaturePass, LibraryFeature, NotesFeature};
pub use local::{ContentFetcher, LocalStore, LogNotifier, MemoryLocalStore, Notifier};
pub use scheduler::{Command, SchedulerRegistry, SyncScheduler};
pub use transport::{CredentialProvider, HttpTransport, StaticToken, SyncTransport};
