//! Record Transform Layer.
//!
//! Maps domain records to and from the backing store's row shape ("wire
//! rows"): snake_case column names, RFC 3339 timestamps, structured
//! sub-objects encoded as [`Blob`]s and an explicit `user_id` owner column.
//!
//! Both directions are pure. `to_wire` always stamps the owner passed in by
//! the caller, so a client-supplied `user_id` never survives. `from_wire`
//! fails closed: a row with a malformed timestamp, enum value or blob is
//! rejected as a whole.

use crate::error::{Error, Result};
use crate::protocol::SyncPayload;
use crate::prefs::{decode_opt, encode_opt};
use crate::record::{
    Book, BookConfig, BookNote, Lifecycle, RecordKey, SyncKind, SyncRecord,
};
use crate::{BookHash, NoteId, Timestamp, UserId};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Format epoch milliseconds as an RFC 3339 UTC timestamp.
///
/// Values past chrono's representable range are rejected.
pub fn to_iso(field: &'static str, ts: Timestamp) -> Result<String> {
    i64::try_from(ts)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| Error::InvalidTimestamp {
            field,
            value: ts.to_string(),
        })
}

fn optional_to_iso(field: &'static str, ts: Option<Timestamp>) -> Result<Option<String>> {
    ts.map(|at| to_iso(field, at)).transpose()
}

/// Parse an RFC 3339 timestamp into epoch milliseconds.
pub fn from_iso(field: &'static str, raw: &str) -> Result<Timestamp> {
    let invalid = || Error::InvalidTimestamp {
        field,
        value: raw.to_string(),
    };
    let parsed = DateTime::parse_from_rfc3339(raw).map_err(|_| invalid())?;
    u64::try_from(parsed.timestamp_millis()).map_err(|_| invalid())
}

fn required_iso(field: &'static str, raw: &Option<String>) -> Result<Timestamp> {
    match raw {
        Some(s) => from_iso(field, s),
        None => Err(Error::MissingField(field)),
    }
}

fn optional_iso(field: &'static str, raw: &Option<String>) -> Result<Option<Timestamp>> {
    raw.as_deref().map(|s| from_iso(field, s)).transpose()
}

fn required_text(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::MissingField(field))
    } else {
        Ok(())
    }
}

/// Bidirectional mapping between a domain record and its wire row.
pub trait Transform: SyncRecord + Sized {
    type Wire: WireShape;

    /// Build the store row owned by `user_id`. Fails on a timestamp that
    /// has no RFC 3339 form.
    fn to_wire(&self, user_id: &str) -> Result<Self::Wire>;

    /// Decode a store row, rejecting it if any field is malformed.
    fn from_wire(row: Self::Wire) -> Result<Self>;
}

/// Common accessors on wire rows, usable without decoding them.
pub trait WireShape:
    Serialize + DeserializeOwned + Clone + std::fmt::Debug + Send + Sync + 'static
{
    const KIND: SyncKind;

    fn user_id(&self) -> &str;
    fn book_hash(&self) -> &str;
    fn key(&self) -> RecordKey;
    fn updated_at(&self) -> Option<&str>;
    fn deleted_at(&self) -> Option<&str> {
        None
    }

    /// Replace the owner column.
    fn set_owner(&mut self, user_id: &str);

    /// Rows of this kind inside a payload.
    fn slot(payload: &SyncPayload) -> &Vec<Self>;

    fn slot_mut(payload: &mut SyncPayload) -> &mut Vec<Self>;

    fn into_row(self) -> WireRow;

    /// Unwrap a kind-erased row of this kind.
    fn from_row(row: WireRow) -> Option<Self>;

    /// `max(updated_at, deleted_at)` in epoch ms. Unparseable or missing
    /// values count as 0.
    fn effective_at(&self) -> Timestamp {
        let parse = |raw: Option<&str>| raw.and_then(|s| from_iso("updated_at", s).ok());
        parse(self.updated_at())
            .unwrap_or(0)
            .max(parse(self.deleted_at()).unwrap_or(0))
    }
}

/// Row shape of the `books` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBook {
    #[serde(default)]
    pub user_id: UserId,
    pub book_hash: BookHash,
    pub format: String,
    pub title: String,
    pub author: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Versioned blob of a [`Progress`](crate::Progress).
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<String>,
    #[serde(default)]
    pub uploaded_at: Option<String>,
}

impl WireShape for WireBook {
    const KIND: SyncKind = SyncKind::Books;

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn book_hash(&self) -> &str {
        &self.book_hash
    }

    fn key(&self) -> RecordKey {
        RecordKey::book(self.book_hash.clone())
    }

    fn updated_at(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }

    fn deleted_at(&self) -> Option<&str> {
        self.deleted_at.as_deref()
    }

    fn set_owner(&mut self, user_id: &str) {
        self.user_id = user_id.to_string();
    }

    fn slot(payload: &SyncPayload) -> &Vec<Self> {
        &payload.books
    }

    fn slot_mut(payload: &mut SyncPayload) -> &mut Vec<Self> {
        &mut payload.books
    }

    fn into_row(self) -> WireRow {
        WireRow::Book(self)
    }

    fn from_row(row: WireRow) -> Option<Self> {
        match row {
            WireRow::Book(r) => Some(r),
            _ => None,
        }
    }
}

impl Transform for Book {
    type Wire = WireBook;

    fn to_wire(&self, user_id: &str) -> Result<WireBook> {
        Ok(WireBook {
            user_id: user_id.to_string(),
            book_hash: self.hash.clone(),
            format: self.format.as_str().to_string(),
            title: self.title.clone(),
            author: self.author.clone(),
            group_id: self.group_id.clone(),
            group_name: self.group_name.clone(),
            tags: Some(self.tags.clone()),
            progress: encode_opt(&self.progress),
            created_at: Some(to_iso("created_at", self.created_at)?),
            updated_at: Some(to_iso("updated_at", self.updated_at)?),
            deleted_at: optional_to_iso("deleted_at", self.lifecycle.deleted_at())?,
            uploaded_at: optional_to_iso("uploaded_at", self.uploaded_at)?,
        })
    }

    fn from_wire(row: WireBook) -> Result<Self> {
        required_text("book_hash", &row.book_hash)?;
        Ok(Book {
            format: row.format.parse()?,
            progress: decode_opt(row.progress.as_deref())?,
            created_at: required_iso("created_at", &row.created_at)?,
            updated_at: required_iso("updated_at", &row.updated_at)?,
            lifecycle: Lifecycle::from(optional_iso("deleted_at", &row.deleted_at)?),
            uploaded_at: optional_iso("uploaded_at", &row.uploaded_at)?,
            hash: row.book_hash,
            title: row.title,
            author: row.author,
            group_id: row.group_id,
            group_name: row.group_name,
            tags: row.tags.unwrap_or_default(),
            downloaded_at: None,
            cover_image_url: None,
        })
    }
}

/// Row shape of the `book_configs` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBookConfig {
    #[serde(default)]
    pub user_id: UserId,
    pub book_hash: BookHash,
    #[serde(default)]
    pub location: Option<String>,
    /// Versioned blob of a [`Progress`](crate::Progress).
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default)]
    pub search_config: Option<String>,
    #[serde(default)]
    pub view_settings: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl WireShape for WireBookConfig {
    const KIND: SyncKind = SyncKind::Configs;

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn book_hash(&self) -> &str {
        &self.book_hash
    }

    fn key(&self) -> RecordKey {
        RecordKey::book(self.book_hash.clone())
    }

    fn updated_at(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }

    fn set_owner(&mut self, user_id: &str) {
        self.user_id = user_id.to_string();
    }

    fn slot(payload: &SyncPayload) -> &Vec<Self> {
        &payload.configs
    }

    fn slot_mut(payload: &mut SyncPayload) -> &mut Vec<Self> {
        &mut payload.configs
    }

    fn into_row(self) -> WireRow {
        WireRow::Config(self)
    }

    fn from_row(row: WireRow) -> Option<Self> {
        match row {
            WireRow::Config(r) => Some(r),
            _ => None,
        }
    }
}

impl Transform for BookConfig {
    type Wire = WireBookConfig;

    fn to_wire(&self, user_id: &str) -> Result<WireBookConfig> {
        Ok(WireBookConfig {
            user_id: user_id.to_string(),
            book_hash: self.book_hash.clone(),
            location: self.location.clone(),
            progress: encode_opt(&self.progress),
            search_config: encode_opt(&self.search_config),
            view_settings: encode_opt(&self.view_settings),
            updated_at: Some(to_iso("updated_at", self.updated_at)?),
        })
    }

    fn from_wire(row: WireBookConfig) -> Result<Self> {
        required_text("book_hash", &row.book_hash)?;
        Ok(BookConfig {
            progress: decode_opt(row.progress.as_deref())?,
            search_config: decode_opt(row.search_config.as_deref())?,
            view_settings: decode_opt(row.view_settings.as_deref())?,
            updated_at: required_iso("updated_at", &row.updated_at)?,
            book_hash: row.book_hash,
            location: row.location,
        })
    }
}

/// Row shape of the `book_notes` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireBookNote {
    #[serde(default)]
    pub user_id: UserId,
    pub book_hash: BookHash,
    pub id: NoteId,
    #[serde(rename = "type")]
    pub kind: String,
    pub cfi: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub deleted_at: Option<String>,
}

impl WireShape for WireBookNote {
    const KIND: SyncKind = SyncKind::Notes;

    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn book_hash(&self) -> &str {
        &self.book_hash
    }

    fn key(&self) -> RecordKey {
        RecordKey::note(self.book_hash.clone(), self.id.clone())
    }

    fn updated_at(&self) -> Option<&str> {
        self.updated_at.as_deref()
    }

    fn deleted_at(&self) -> Option<&str> {
        self.deleted_at.as_deref()
    }

    fn set_owner(&mut self, user_id: &str) {
        self.user_id = user_id.to_string();
    }

    fn slot(payload: &SyncPayload) -> &Vec<Self> {
        &payload.notes
    }

    fn slot_mut(payload: &mut SyncPayload) -> &mut Vec<Self> {
        &mut payload.notes
    }

    fn into_row(self) -> WireRow {
        WireRow::Note(self)
    }

    fn from_row(row: WireRow) -> Option<Self> {
        match row {
            WireRow::Note(r) => Some(r),
            _ => None,
        }
    }
}

impl Transform for BookNote {
    type Wire = WireBookNote;

    fn to_wire(&self, user_id: &str) -> Result<WireBookNote> {
        Ok(WireBookNote {
            user_id: user_id.to_string(),
            book_hash: self.book_hash.clone(),
            id: self.id.clone(),
            kind: self.kind.as_str().to_string(),
            cfi: self.cfi.clone(),
            text: self.text.clone(),
            style: self.style.map(|s| s.as_str().to_string()),
            color: self.color.map(|c| c.as_str().to_string()),
            note: self.note.clone(),
            created_at: Some(to_iso("created_at", self.created_at)?),
            updated_at: Some(to_iso("updated_at", self.updated_at)?),
            deleted_at: optional_to_iso("deleted_at", self.lifecycle.deleted_at())?,
        })
    }

    fn from_wire(row: WireBookNote) -> Result<Self> {
        required_text("book_hash", &row.book_hash)?;
        required_text("id", &row.id)?;
        Ok(BookNote {
            kind: row.kind.parse()?,
            style: row.style.as_deref().map(str::parse).transpose()?,
            color: row.color.as_deref().map(str::parse).transpose()?,
            created_at: required_iso("created_at", &row.created_at)?,
            updated_at: required_iso("updated_at", &row.updated_at)?,
            lifecycle: Lifecycle::from(optional_iso("deleted_at", &row.deleted_at)?),
            book_hash: row.book_hash,
            id: row.id,
            cfi: row.cfi,
            text: row.text,
            note: row.note,
        })
    }
}

/// A wire row of any kind, for code paths that handle all three uniformly.
#[derive(Debug, Clone, PartialEq)]
pub enum WireRow {
    Book(WireBook),
    Config(WireBookConfig),
    Note(WireBookNote),
}

impl WireRow {
    pub fn kind(&self) -> SyncKind {
        match self {
            WireRow::Book(_) => SyncKind::Books,
            WireRow::Config(_) => SyncKind::Configs,
            WireRow::Note(_) => SyncKind::Notes,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            WireRow::Book(r) => r.user_id(),
            WireRow::Config(r) => r.user_id(),
            WireRow::Note(r) => r.user_id(),
        }
    }

    pub fn book_hash(&self) -> &str {
        match self {
            WireRow::Book(r) => r.book_hash(),
            WireRow::Config(r) => r.book_hash(),
            WireRow::Note(r) => r.book_hash(),
        }
    }

    pub fn key(&self) -> RecordKey {
        match self {
            WireRow::Book(r) => r.key(),
            WireRow::Config(r) => r.key(),
            WireRow::Note(r) => r.key(),
        }
    }

    pub fn updated_at(&self) -> Option<&str> {
        match self {
            WireRow::Book(r) => r.updated_at(),
            WireRow::Config(r) => r.updated_at(),
            WireRow::Note(r) => r.updated_at(),
        }
    }

    pub fn deleted_at(&self) -> Option<&str> {
        match self {
            WireRow::Book(r) => r.deleted_at(),
            WireRow::Config(r) => r.deleted_at(),
            WireRow::Note(r) => r.deleted_at(),
        }
    }

    pub fn effective_at(&self) -> Timestamp {
        match self {
            WireRow::Book(r) => r.effective_at(),
            WireRow::Config(r) => r.effective_at(),
            WireRow::Note(r) => r.effective_at(),
        }
    }
}

impl From<WireBook> for WireRow {
    fn from(row: WireBook) -> Self {
        WireRow::Book(row)
    }
}

impl From<WireBookConfig> for WireRow {
    fn from(row: WireBookConfig) -> Self {
        WireRow::Config(row)
    }
}

impl From<WireBookNote> for WireRow {
    fn from(row: WireBookNote) -> Self {
        WireRow::Note(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::{Blob, SearchConfig, ViewSettings};
    use crate::record::{BookFormat, HighlightColor, HighlightStyle, NoteKind, Progress};

    #[test]
    fn iso_conversion() {
        assert_eq!(to_iso("updated_at", 0).unwrap(), "1970-01-01T00:00:00.000Z");
        assert_eq!(
            to_iso("updated_at", 1_706_745_600_123).unwrap(),
            "2024-02-01T00:00:00.123Z"
        );
        assert_eq!(
            from_iso("updated_at", "2024-02-01T00:00:00.123Z").unwrap(),
            1_706_745_600_123
        );
        assert_eq!(
            from_iso("updated_at", "2024-02-01T01:00:00.123+01:00").unwrap(),
            1_706_745_600_123
        );
        assert!(from_iso("updated_at", "yesterday").is_err());
        assert!(from_iso("updated_at", "1969-12-31T23:59:59Z").is_err());
    }

    #[test]
    fn book_to_wire_overwrites_owner_and_strips_local_fields() {
        let mut book = Book::new("abc", BookFormat::Epub, "Foo", "Anon", 1000);
        book.cover_image_url = Some("blob:cover".into());
        book.downloaded_at = Some(1500);
        book.uploaded_at = Some(1200);

        let row = book.to_wire("user-1").unwrap();
        assert_eq!(row.user_id, "user-1");
        assert_eq!(row.format, "EPUB");
        assert_eq!(row.uploaded_at.as_deref(), Some("1970-01-01T00:00:01.200Z"));
        assert_eq!(row.deleted_at, None);

        let json = serde_json::to_value(&row).unwrap();
        assert!(json.get("cover_image_url").is_none());
        assert!(json.get("downloaded_at").is_none());
        // tombstone column is always present so it can be cleared
        assert!(json.get("deleted_at").unwrap().is_null());

        let back = Book::from_wire(row).unwrap();
        assert_eq!(back.cover_image_url, None);
        assert_eq!(back.downloaded_at, None);
        assert_eq!(back.uploaded_at, Some(1200));
        assert_eq!(back.title, "Foo");
    }

    #[test]
    fn book_tombstone_survives_transform() {
        let mut book = Book::new("abc", BookFormat::Pdf, "Foo", "Anon", 1000);
        book.mark_deleted(4000);
        let back = Book::from_wire(book.to_wire("u").unwrap()).unwrap();
        assert_eq!(back.lifecycle, Lifecycle::Deleted(4000));
    }

    #[test]
    fn book_rejects_unknown_format_and_bad_timestamps() {
        let mut row = Book::new("abc", BookFormat::Epub, "Foo", "Anon", 1000)
            .to_wire("u")
            .unwrap();
        row.format = "DOCX".into();
        assert!(Book::from_wire(row.clone()).is_err());

        row.format = "epub".into();
        row.updated_at = Some("not a date".into());
        assert!(matches!(
            Book::from_wire(row.clone()),
            Err(Error::InvalidTimestamp {
                field: "updated_at",
                ..
            })
        ));

        row.updated_at = None;
        assert_eq!(
            Book::from_wire(row),
            Err(Error::MissingField("updated_at"))
        );
    }

    #[test]
    fn timestamps_past_chrono_range_are_rejected() {
        assert!(matches!(
            to_iso("updated_at", u64::MAX),
            Err(Error::InvalidTimestamp {
                field: "updated_at",
                ..
            })
        ));

        let mut book = Book::new("abc", BookFormat::Epub, "Foo", "Anon", 1000);
        book.uploaded_at = Some(i64::MAX as u64);
        assert!(matches!(
            book.to_wire("u"),
            Err(Error::InvalidTimestamp {
                field: "uploaded_at",
                ..
            })
        ));
    }

    #[test]
    fn book_progress_is_a_blob() {
        let mut book = Book::new("abc", BookFormat::Epub, "Foo", "Anon", 1000);
        book.progress = Some(Progress::new(12, 300));

        let row = book.to_wire("u").unwrap();
        let raw = row.progress.clone().unwrap();
        assert_eq!(Progress::decode(&raw).unwrap(), Progress::new(12, 300));
        assert_eq!(Book::from_wire(row).unwrap().progress, Some(Progress::new(12, 300)));
    }

    #[test]
    fn book_with_malformed_progress_is_rejected() {
        let mut row = Book::new("abc", BookFormat::Epub, "Foo", "Anon", 1000)
            .to_wire("u")
            .unwrap();
        row.progress = Some("[12,300]".into());
        assert!(matches!(
            Book::from_wire(row.clone()),
            Err(Error::MalformedBlob {
                field: "progress",
                ..
            })
        ));

        row.progress = Some(r#"{"v":2,"data":{"current":1,"total":2}}"#.into());
        assert_eq!(
            Book::from_wire(row),
            Err(Error::UnsupportedBlobVersion {
                field: "progress",
                version: 2
            })
        );
    }

    #[test]
    fn config_blobs_are_encoded() {
        let mut config = BookConfig::new("abc", 2000);
        config.set_position("epubcfi(/6/4!/4/2/1:10)", Progress::new(4, 10), 2500);
        config.search_config = Some(SearchConfig {
            match_case: true,
            ..SearchConfig::default()
        });
        config.view_settings = Some(ViewSettings::default());

        let row = config.to_wire("user-1").unwrap();
        let progress = row.progress.clone().unwrap();
        assert_eq!(Progress::decode(&progress).unwrap(), Progress::new(4, 10));
        assert!(row.search_config.as_deref().unwrap().contains("\"matchCase\":true"));

        let back = BookConfig::from_wire(row).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn config_with_malformed_blob_is_rejected() {
        let mut row = BookConfig::new("abc", 2000).to_wire("u").unwrap();
        row.view_settings = Some(r#"{"fontSize":12}"#.into());
        assert!(matches!(
            BookConfig::from_wire(row),
            Err(Error::MalformedBlob {
                field: "view_settings",
                ..
            })
        ));
    }

    #[test]
    fn note_transform() {
        let mut note = BookNote::new("abc", "n-1", NoteKind::Annotation, "epubcfi(/6/4!/2)", 10);
        note.style = Some(HighlightStyle::Underline);
        note.color = Some(HighlightColor::Violet);
        note.text = Some("quoted".into());
        note.note = "my thoughts".into();

        let row = note.to_wire("user-1").unwrap();
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["type"], "annotation");
        assert_eq!(json["style"], "underline");
        assert_eq!(json["color"], "violet");

        assert_eq!(BookNote::from_wire(row).unwrap(), note);
    }

    #[test]
    fn note_requires_id() {
        let mut row = BookNote::new("abc", "n-1", NoteKind::Bookmark, "epubcfi(/6/4!/2)", 10)
            .to_wire("u")
            .unwrap();
        row.id = String::new();
        assert_eq!(BookNote::from_wire(row), Err(Error::MissingField("id")));
    }

    #[test]
    fn wire_row_effective_time() {
        let mut note = BookNote::new("abc", "n-1", NoteKind::Bookmark, "epubcfi(/6/4!/2)", 10);
        note.mark_deleted(90);
        note.updated_at = 50;
        let row = WireRow::from(note.to_wire("u").unwrap());
        assert_eq!(row.kind(), SyncKind::Notes);
        assert_eq!(row.effective_at(), 90);
        assert_eq!(row.key().to_string(), "abc/n-1");

        let mut book = Book::new("abc", BookFormat::Epub, "Foo", "Anon", 1000)
            .to_wire("u")
            .unwrap();
        book.updated_at = Some("garbage".into());
        assert_eq!(WireRow::from(book).effective_at(), 0);
    }

    #[test]
    fn client_row_without_owner_deserializes() {
        let json = serde_json::json!({
            "book_hash": "abc",
            "format": "EPUB",
            "title": "Foo",
            "author": "Anon",
            "created_at": "2024-02-01T00:00:00.000Z",
            "updated_at": "2024-02-01T00:00:00.000Z"
        });
        let row: WireBook = serde_json::from_value(json).unwrap();
        assert_eq!(row.user_id, "");
        assert!(Book::from_wire(row).is_ok());
    }
}
