//! Request and response bodies of the `/sync` endpoint.

use crate::record::SyncKind;
use crate::wire::{WireBook, WireBookConfig, WireBookNote, WireRow, WireShape};
use crate::{BookHash, Timestamp};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// Query string of `GET /sync`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullQuery {
    /// Watermark in epoch ms; rows changed strictly after it are returned.
    #[serde(deserialize_with = "from_text_or_number")]
    pub since: Timestamp,
    /// Entity type to pull. Absent means all three.
    #[serde(
        rename = "type",
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub kind: Option<SyncKind>,
    /// Restrict the pull to one book's rows.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub book: Option<BookHash>,
}

impl PullQuery {
    pub fn new(since: Timestamp, kind: SyncKind) -> Self {
        Self {
            since,
            kind: Some(kind),
            book: None,
        }
    }

    pub fn scoped(mut self, book: Option<BookHash>) -> Self {
        self.book = book;
        self
    }

    /// Kinds this query asks for.
    pub fn kinds(&self) -> Vec<SyncKind> {
        match self.kind {
            Some(kind) => vec![kind],
            None => SyncKind::ALL.to_vec(),
        }
    }
}

fn from_text_or_number<'de, D>(de: D) -> std::result::Result<Timestamp, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Raw::deserialize(de)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| de::Error::custom(format!("invalid since value '{s}'"))),
    }
}

fn empty_as_none<'de, D, T>(de: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let raw: Option<String> = Option::deserialize(de)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(de::Error::custom),
    }
}

/// A record that could not be reconciled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRow {
    #[serde(rename = "type")]
    pub kind: SyncKind,
    /// Upsert key as `book_hash` or `book_hash/note_id`; empty if unreadable.
    pub key: String,
    pub reason: String,
}

/// Rows grouped by type. Push request, pull response and push response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPayload {
    #[serde(default)]
    pub books: Vec<WireBook>,
    #[serde(default)]
    pub configs: Vec<WireBookConfig>,
    #[serde(default)]
    pub notes: Vec<WireBookNote>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rejected: Vec<RejectedRow>,
}

impl SyncPayload {
    pub fn is_empty(&self) -> bool {
        self.books.is_empty() && self.configs.is_empty() && self.notes.is_empty()
    }

    /// Number of rows across all kinds.
    pub fn len(&self) -> usize {
        self.books.len() + self.configs.len() + self.notes.len()
    }

    /// Rows of one wire shape.
    pub fn rows<W: WireShape>(&self) -> &[W] {
        W::slot(self)
    }

    pub fn take_rows<W: WireShape>(&mut self) -> Vec<W> {
        std::mem::take(W::slot_mut(self))
    }

    pub fn push_row(&mut self, row: WireRow) {
        match row {
            WireRow::Book(r) => self.books.push(r),
            WireRow::Config(r) => self.configs.push(r),
            WireRow::Note(r) => self.notes.push(r),
        }
    }

    pub fn into_rows(self) -> Vec<WireRow> {
        let books = self.books.into_iter().map(WireRow::Book);
        let configs = self.configs.into_iter().map(WireRow::Config);
        let notes = self.notes.into_iter().map(WireRow::Note);
        books.chain(configs).chain(notes).collect()
    }
}

impl FromIterator<WireRow> for SyncPayload {
    fn from_iter<I: IntoIterator<Item = WireRow>>(iter: I) -> Self {
        let mut payload = SyncPayload::default();
        for row in iter {
            payload.push_row(row);
        }
        payload
    }
}

/// A payload whose rows have not been decoded yet.
///
/// Rows are kept as raw JSON so that one malformed row is rejected on its
/// own instead of failing the whole body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawSyncPayload {
    #[serde(default)]
    pub books: Vec<serde_json::Value>,
    #[serde(default)]
    pub configs: Vec<serde_json::Value>,
    #[serde(default)]
    pub notes: Vec<serde_json::Value>,
    #[serde(default)]
    pub rejected: Vec<RejectedRow>,
}

impl RawSyncPayload {
    /// Decode every row, collecting the ones that do not fit their shape.
    /// Rejections already listed by the sender are kept, which is what a
    /// client reading a push response wants.
    pub fn decode(self) -> SyncPayload {
        let mut payload = SyncPayload {
            rejected: self.rejected,
            ..SyncPayload::default()
        };
        decode_into::<WireBook>(self.books, &mut payload);
        decode_into::<WireBookConfig>(self.configs, &mut payload);
        decode_into::<WireBookNote>(self.notes, &mut payload);
        payload
    }

    /// Decode a push request. Only the endpoint reports rejections, so a
    /// `rejected` list sent by the client is dropped.
    pub fn decode_request(mut self) -> SyncPayload {
        self.rejected.clear();
        self.decode()
    }
}

fn decode_into<W: WireShape>(values: Vec<serde_json::Value>, payload: &mut SyncPayload) {
    for value in values {
        match serde_json::from_value::<W>(value.clone()) {
            Ok(row) => W::slot_mut(payload).push(row),
            Err(e) => payload.rejected.push(RejectedRow {
                kind: W::KIND,
                key: raw_key(&value),
                reason: e.to_string(),
            }),
        }
    }
}

fn raw_key(value: &serde_json::Value) -> String {
    let hash = value.get("book_hash").and_then(|v| v.as_str()).unwrap_or("");
    match value.get("id").and_then(|v| v.as_str()) {
        Some(id) => format!("{hash}/{id}"),
        None => hash.to_string(),
    }
}

/// Body of every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
