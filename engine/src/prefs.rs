//! Structured per-book preferences and their blob encoding.
//!
//! The backing store keeps preferences and reading progress as opaque text
//! columns. Inside the engine they are explicit structs; the only place they
//! turn into strings is [`Blob::encode`] / [`Blob::decode`], which wrap the
//! body in a versioned envelope:
//!
//! ```text
//! {"v":1,"data":{...}}
//! ```
//!
//! Decoding is strict. An unknown version, a missing envelope or an unknown
//! field rejects the whole blob instead of dropping what it does not
//! understand.

use crate::error::{Error, Result};
use crate::record::Progress;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Current envelope version written by [`Blob::encode`].
pub const BLOB_VERSION: u32 = 1;

/// A structure stored as a versioned text blob on the wire.
pub trait Blob: Serialize + DeserializeOwned {
    /// Wire column name, used in error messages.
    const FIELD: &'static str;

    /// Encode into the versioned envelope.
    fn encode(&self) -> String {
        let envelope = serde_json::json!({ "v": BLOB_VERSION, "data": self });
        envelope.to_string()
    }

    /// Decode from the versioned envelope, failing closed.
    fn decode(raw: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| Error::blob(Self::FIELD, e))?;
        let obj = value
            .as_object()
            .ok_or_else(|| Error::blob(Self::FIELD, "expected an object envelope"))?;
        let version = obj
            .get("v")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::blob(Self::FIELD, "missing envelope version"))?;
        if version != BLOB_VERSION as u64 {
            return Err(Error::UnsupportedBlobVersion {
                field: Self::FIELD,
                version: version as u32,
            });
        }
        if obj.keys().any(|k| k != "v" && k != "data") {
            return Err(Error::blob(Self::FIELD, "unexpected envelope field"));
        }
        let data = obj
            .get("data")
            .cloned()
            .ok_or_else(|| Error::blob(Self::FIELD, "missing envelope data"))?;
        serde_json::from_value(data).map_err(|e| Error::blob(Self::FIELD, e))
    }
}

/// Where an in-book search looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    #[default]
    Book,
    Section,
}

/// Search preferences remembered per book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct SearchConfig {
    pub scope: SearchScope,
    pub match_case: bool,
    pub match_whole_words: bool,
    pub match_diacritics: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            scope: SearchScope::Book,
            match_case: false,
            match_whole_words: false,
            match_diacritics: false,
        }
    }
}

impl Blob for SearchConfig {
    const FIELD: &'static str = "search_config";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
    Sepia,
    Auto,
}

/// Layout and typography preferences remembered per book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ViewSettings {
    pub theme: Theme,
    pub font_family: String,
    pub font_size: u32,
    pub line_height: f64,
    pub word_spacing: f64,
    pub margin_px: u32,
    pub gap_percent: u32,
    pub scrolled: bool,
    pub max_column_count: u32,
    pub justify: bool,
    pub hyphenate: bool,
    pub zoom_level: u32,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            font_family: "Serif".to_string(),
            font_size: 16,
            line_height: 1.6,
            word_spacing: 0.0,
            margin_px: 44,
            gap_percent: 5,
            scrolled: false,
            max_column_count: 2,
            justify: true,
            hyphenate: true,
            zoom_level: 100,
        }
    }
}

impl Blob for ViewSettings {
    const FIELD: &'static str = "view_settings";
}

impl Blob for Progress {
    const FIELD: &'static str = "progress";
}

/// Encode an optional blob column.
pub(crate) fn encode_opt<B: Blob>(value: &Option<B>) -> Option<String> {
    value.as_ref().map(Blob::encode)
}

/// Decode an optional blob column. Empty strings are treated as absent.
pub(crate) fn decode_opt<B: Blob>(raw: Option<&str>) -> Result<Option<B>> {
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => B::decode(s).map(Some),
    }
}
