//! Domain records as the client sees them.
//!
//! Three entity kinds are synchronized: books, per-book configuration and
//! per-book notes. All of them are owned by exactly one user and are never
//! physically removed; deletion is a [`Lifecycle::Deleted`] tombstone so it
//! travels through the same "changed since" mechanism as any update.

use crate::error::{Error, Result};
use crate::location::Cfi;
use crate::prefs::{SearchConfig, ViewSettings};
use crate::{BookHash, NoteId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three synchronized entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    Books,
    Configs,
    Notes,
}

impl SyncKind {
    /// Every kind, in the order the endpoint processes them.
    pub const ALL: [SyncKind; 3] = [SyncKind::Books, SyncKind::Configs, SyncKind::Notes];

    /// Name used in the `type` query parameter and response keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Books => "books",
            SyncKind::Configs => "configs",
            SyncKind::Notes => "notes",
        }
    }

    /// Backing-store table holding rows of this kind.
    pub fn table(&self) -> &'static str {
        match self {
            SyncKind::Books => "books",
            SyncKind::Configs => "book_configs",
            SyncKind::Notes => "book_notes",
        }
    }
}

impl fmt::Display for SyncKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "books" => Ok(SyncKind::Books),
            "configs" => Ok(SyncKind::Configs),
            "notes" => Ok(SyncKind::Notes),
            other => Err(Error::UnknownSyncType(other.to_string())),
        }
    }
}

/// Which halves of a reconciliation pass to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOp {
    Push,
    Pull,
    /// Push local changes, then pull unconditionally.
    #[default]
    Both,
}

impl SyncOp {
    pub fn pushes(&self) -> bool {
        matches!(self, SyncOp::Push | SyncOp::Both)
    }

    pub fn pulls(&self) -> bool {
        matches!(self, SyncOp::Pull | SyncOp::Both)
    }
}

/// Soft-delete state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<Timestamp>", into = "Option<Timestamp>")]
pub enum Lifecycle {
    #[default]
    Active,
    /// Tombstoned at the given time.
    Deleted(Timestamp),
}

impl Lifecycle {
    pub fn is_deleted(&self) -> bool {
        matches!(self, Lifecycle::Deleted(_))
    }

    pub fn deleted_at(&self) -> Option<Timestamp> {
        match self {
            Lifecycle::Active => None,
            Lifecycle::Deleted(at) => Some(*at),
        }
    }
}

impl From<Option<Timestamp>> for Lifecycle {
    fn from(value: Option<Timestamp>) -> Self {
        match value {
            Some(at) => Lifecycle::Deleted(at),
            None => Lifecycle::Active,
        }
    }
}

impl From<Lifecycle> for Option<Timestamp> {
    fn from(value: Lifecycle) -> Self {
        value.deleted_at()
    }
}

/// Reading progress as `(current, total)` pages or sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(u32, u32)", into = "(u32, u32)")]
pub struct Progress {
    pub current: u32,
    pub total: u32,
}

impl Progress {
    pub fn new(current: u32, total: u32) -> Self {
        Self { current, total }
    }

    /// Fraction read, or `None` when the total is unknown.
    pub fn fraction(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.current as f64 / self.total as f64)
        }
    }
}

impl From<(u32, u32)> for Progress {
    fn from((current, total): (u32, u32)) -> Self {
        Self { current, total }
    }
}

impl From<Progress> for (u32, u32) {
    fn from(p: Progress) -> Self {
        (p.current, p.total)
    }
}

/// Upsert key of a record, not including the owning user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordKey {
    pub book_hash: BookHash,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note_id: Option<NoteId>,
}

impl RecordKey {
    pub fn book(book_hash: impl Into<BookHash>) -> Self {
        Self {
            book_hash: book_hash.into(),
            note_id: None,
        }
    }

    pub fn note(book_hash: impl Into<BookHash>, note_id: impl Into<NoteId>) -> Self {
        Self {
            book_hash: book_hash.into(),
            note_id: Some(note_id.into()),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.note_id {
            Some(id) => write!(f, "{}/{}", self.book_hash, id),
            None => f.write_str(&self.book_hash),
        }
    }
}

/// Behaviour shared by every synchronized record.
pub trait SyncRecord: Clone + Send + Sync + 'static {
    /// Entity type of this record.
    const KIND: SyncKind;

    /// Content hash of the book this record belongs to.
    fn book_hash(&self) -> &str;

    /// Upsert key within the owning user's rows.
    fn key(&self) -> RecordKey;

    /// Last modification time.
    fn updated_at(&self) -> Timestamp;

    /// Tombstone time, if deleted.
    fn deleted_at(&self) -> Option<Timestamp> {
        None
    }

    /// `max(updated_at, deleted_at)`: the value compared by last-write-wins.
    fn effective_at(&self) -> Timestamp {
        self.updated_at().max(self.deleted_at().unwrap_or(0))
    }

    /// Record a modification at `now`.
    fn touch(&mut self, now: Timestamp);

    /// Whether this record changed after `watermark`.
    fn changed_since(&self, watermark: Timestamp) -> bool {
        self.updated_at() > watermark || self.deleted_at().is_some_and(|d| d > watermark)
    }
}

/// Container format of a book file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BookFormat {
    Epub,
    Pdf,
    Mobi,
    Azw3,
    Cbz,
    Fb2,
    Fbz,
    Txt,
}

impl BookFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookFormat::Epub => "EPUB",
            BookFormat::Pdf => "PDF",
            BookFormat::Mobi => "MOBI",
            BookFormat::Azw3 => "AZW3",
            BookFormat::Cbz => "CBZ",
            BookFormat::Fb2 => "FB2",
            BookFormat::Fbz => "FBZ",
            BookFormat::Txt => "TXT",
        }
    }
}

impl FromStr for BookFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "EPUB" => Ok(BookFormat::Epub),
            "PDF" => Ok(BookFormat::Pdf),
            "MOBI" => Ok(BookFormat::Mobi),
            "AZW3" => Ok(BookFormat::Azw3),
            "CBZ" => Ok(BookFormat::Cbz),
            "FB2" => Ok(BookFormat::Fb2),
            "FBZ" => Ok(BookFormat::Fbz),
            "TXT" => Ok(BookFormat::Txt),
            _ => Err(Error::value("format", s)),
        }
    }
}

/// A book in the user's library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    /// Partial content hash, see [`crate::fingerprint`].
    pub hash: BookHash,
    pub format: BookFormat,
    pub title: String,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(rename = "deletedAt", default)]
    pub lifecycle: Lifecycle,
    /// Set while the file is resident in cloud storage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<Timestamp>,
    /// Local only: when this device last fetched the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downloaded_at: Option<Timestamp>,
    /// Local only: derived display URL, never synchronized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image_url: Option<String>,
}

impl Book {
    pub fn new(
        hash: impl Into<BookHash>,
        format: BookFormat,
        title: impl Into<String>,
        author: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            hash: hash.into(),
            format,
            title: title.into(),
            author: author.into(),
            group_id: None,
            group_name: None,
            tags: Vec::new(),
            progress: None,
            created_at: now,
            updated_at: now,
            lifecycle: Lifecycle::Active,
            uploaded_at: None,
            downloaded_at: None,
            cover_image_url: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.lifecycle.is_deleted()
    }

    /// Whether the book file lives in cloud storage.
    pub fn is_cloud_resident(&self) -> bool {
        self.uploaded_at.is_some()
    }

    /// Tombstone the book.
    pub fn mark_deleted(&mut self, now: Timestamp) {
        self.lifecycle = Lifecycle::Deleted(now);
        self.updated_at = now;
    }
}

impl SyncRecord for Book {
    const KIND: SyncKind = SyncKind::Books;

    fn book_hash(&self) -> &str {
        &self.hash
    }

    fn key(&self) -> RecordKey {
        RecordKey::book(self.hash.clone())
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
    }

    fn deleted_at(&self) -> Option<Timestamp> {
        self.lifecycle.deleted_at()
    }
}

/// Per-book reading state and preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookConfig {
    pub book_hash: BookHash,
    /// Last reading location (CFI for reflowable formats).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_config: Option<SearchConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_settings: Option<ViewSettings>,
    pub updated_at: Timestamp,
}

impl BookConfig {
    pub fn new(book_hash: impl Into<BookHash>, now: Timestamp) -> Self {
        Self {
            book_hash: book_hash.into(),
            location: None,
            progress: None,
            search_config: None,
            view_settings: None,
            updated_at: now,
        }
    }

    /// Fraction read, if both the config and its progress total are known.
    pub fn fraction(&self) -> Option<f64> {
        self.progress.and_then(|p| p.fraction())
    }

    /// Move the reading position and record the modification.
    pub fn set_position(&mut self, location: impl Into<String>, progress: Progress, now: Timestamp) {
        self.location = Some(location.into());
        self.progress = Some(progress);
        self.updated_at = now;
    }
}

impl SyncRecord for BookConfig {
    const KIND: SyncKind = SyncKind::Configs;

    fn book_hash(&self) -> &str {
        &self.book_hash
    }

    fn key(&self) -> RecordKey {
        RecordKey::book(self.book_hash.clone())
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
    }
}

/// What kind of note a [`BookNote`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteKind {
    Bookmark,
    Annotation,
    Excerpt,
}

impl NoteKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoteKind::Bookmark => "bookmark",
            NoteKind::Annotation => "annotation",
            NoteKind::Excerpt => "excerpt",
        }
    }
}

impl FromStr for NoteKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bookmark" => Ok(NoteKind::Bookmark),
            "annotation" => Ok(NoteKind::Annotation),
            "excerpt" => Ok(NoteKind::Excerpt),
            _ => Err(Error::value("type", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightStyle {
    Highlight,
    Underline,
    Squiggly,
}

impl HighlightStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            HighlightStyle::Highlight => "highlight",
            HighlightStyle::Underline => "underline",
            HighlightStyle::Squiggly => "squiggly",
        }
    }
}

impl FromStr for HighlightStyle {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "highlight" => Ok(HighlightStyle::Highlight),
            "underline" => Ok(HighlightStyle::Underline),
            "squiggly" => Ok(HighlightStyle::Squiggly),
            _ => Err(Error::value("style", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HighlightColor {
    Red,
    Yellow,
    Green,
    Blue,
    Violet,
}

impl HighlightColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            HighlightColor::Red => "red",
            HighlightColor::Yellow => "yellow",
            HighlightColor::Green => "green",
            HighlightColor::Blue => "blue",
            HighlightColor::Violet => "violet",
        }
    }
}

impl FromStr for HighlightColor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "red" => Ok(HighlightColor::Red),
            "yellow" => Ok(HighlightColor::Yellow),
            "green" => Ok(HighlightColor::Green),
            "blue" => Ok(HighlightColor::Blue),
            "violet" => Ok(HighlightColor::Violet),
            _ => Err(Error::value("color", s)),
        }
    }
}

/// A bookmark, highlight annotation or excerpt inside a book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookNote {
    pub book_hash: BookHash,
    /// Locally generated opaque id, unique within the book.
    pub id: NoteId,
    #[serde(rename = "type")]
    pub kind: NoteKind,
    /// Position in the book's content.
    pub cfi: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<HighlightStyle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<HighlightColor>,
    #[serde(default)]
    pub note: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(rename = "deletedAt", default)]
    pub lifecycle: Lifecycle,
}

impl BookNote {
    pub fn new(
        book_hash: impl Into<BookHash>,
        id: impl Into<NoteId>,
        kind: NoteKind,
        cfi: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            book_hash: book_hash.into(),
            id: id.into(),
            kind,
            cfi: cfi.into(),
            text: None,
            style: None,
            color: None,
            note: String::new(),
            created_at: now,
            updated_at: now,
            lifecycle: Lifecycle::Active,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.lifecycle.is_deleted()
    }

    /// Parsed location of the note.
    pub fn location(&self) -> Result<Cfi> {
        self.cfi.parse()
    }

    pub fn mark_deleted(&mut self, now: Timestamp) {
        self.lifecycle = Lifecycle::Deleted(now);
        self.updated_at = now;
    }
}

impl SyncRecord for BookNote {
    const KIND: SyncKind = SyncKind::Notes;

    fn book_hash(&self) -> &str {
        &self.book_hash
    }

    fn key(&self) -> RecordKey {
        RecordKey::note(self.book_hash.clone(), self.id.clone())
    }

    fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
    }

    fn deleted_at(&self) -> Option<Timestamp> {
        self.lifecycle.deleted_at()
    }
}
