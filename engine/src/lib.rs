//! # Shelfsync Engine
//!
//! The deterministic core of shelfsync, an incremental bidirectional sync
//! engine for a reading app's library, per-book configuration and notes.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine knows nothing about files, network or platform
//! - **Injected time**: every timestamp comes from a [`Clock`] or a caller
//! - **Pure decisions**: reconciliation, merge and debounce are plain functions
//!   and state machines, testable without mocks
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! [`Book`], [`BookConfig`] and [`BookNote`] are the synchronized entities.
//! They are never removed; deletion is a [`Lifecycle::Deleted`] tombstone so
//! it travels through the same "changed since" query as an update.
//!
//! ### Wire rows
//!
//! The [`wire`] module maps records to store rows and back. Structured
//! preferences become versioned [`prefs::Blob`]s and decoding fails closed.
//!
//! ### Last write wins
//!
//! [`reconcile::decide`] compares `max(updated_at, deleted_at)` of a pushed
//! record against the stored one. Written rows get a server-minted stamp.
//!
//! ### Watermarks and scheduling
//!
//! [`Watermarks`] track what a client has pulled; [`Debouncer`] coalesces
//! local mutations into one pass per interval.
//!
//! ## Quick Start
//!
//! ```rust
//! use shelfsync_engine::{
//!     reconcile, Book, BookFormat, Decision, Transform, SyncRecord,
//! };
//!
//! // A client creates a book and pushes its wire row.
//! let book = Book::new("abc", BookFormat::Epub, "Foo", "Anon", 100);
//! let row = book.to_wire("user-1").unwrap();
//! assert_eq!(row.updated_at.as_deref(), Some("1970-01-01T00:00:00.100Z"));
//!
//! // The endpoint decodes it and decides against the (absent) stored row.
//! let incoming = Book::from_wire(row).unwrap();
//! let (decision, stored) = reconcile::resolve(incoming, None, 5_000);
//! assert_eq!(decision, Decision::Insert);
//! assert_eq!(stored.updated_at(), 5_000);
//! ```

pub mod clock;
pub mod error;
pub mod fingerprint;
pub mod location;
pub mod merge;
pub mod prefs;
pub mod protocol;
pub mod reconcile;
pub mod record;
pub mod schedule;
pub mod watermark;
pub mod wire;

// Re-export main types at crate root
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use error::{Error, Result};
pub use location::Cfi;
pub use merge::{BookMerge, ConfigMerge};
pub use prefs::{Blob, SearchConfig, SearchScope, Theme, ViewSettings};
pub use protocol::{ErrorBody, PullQuery, RawSyncPayload, RejectedRow, SyncPayload};
pub use reconcile::{Decision, ReconcileStats};
pub use record::{
    Book, BookConfig, BookFormat, BookNote, HighlightColor, HighlightStyle, Lifecycle, NoteKind,
    Progress, RecordKey, SyncKind, SyncOp, SyncRecord,
};
pub use schedule::{Action, Debouncer, Outcome, Phase};
pub use watermark::{
    MemoryWatermarkStore, Watermark, WatermarkKey, WatermarkStore, Watermarks, DEFAULT_LOOK_BACK,
};
pub use wire::{Transform, WireBook, WireBookConfig, WireBookNote, WireRow, WireShape};

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
pub type UserId = String;
pub type BookHash = String;
pub type NoteId = String;
