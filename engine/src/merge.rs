//! Client-side merge of pulled records into local state.
//!
//! Each entity kind has its own policy:
//!
//! - **Books**: a remote copy overwrites the matching local book except for
//!   `updated_at`, the tombstone and reading progress, which this device
//!   pushes itself. Unknown remote books that are not tombstoned are
//!   adopted; the caller fetches the content of cloud-resident ones first.
//! - **Configs**: remote preferences are adopted; the reading position only
//!   moves forward, and only when both fractions are known.
//! - **Notes**: replaced by id, local-only notes kept, remote-only notes
//!   appended.

use crate::location::Cfi;
use crate::record::{Book, BookConfig, BookNote, SyncRecord};
use crate::{BookHash, Timestamp};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

/// Result of [`merge_books`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookMerge {
    /// Local library with matched remote copies applied, in local order.
    pub library: Vec<Book>,
    /// Remote books unknown locally that should be added. Cloud-resident
    /// ones need their content fetched first.
    pub adopt: Vec<Book>,
    /// Matched books resident in the cloud but missing on this device.
    pub download: Vec<BookHash>,
}

/// Merge pulled books into the local library.
pub fn merge_books(local: &[Book], remote: Vec<Book>) -> BookMerge {
    let mut remote: HashMap<BookHash, Book> =
        remote.into_iter().map(|b| (b.hash.clone(), b)).collect();
    let mut merge = BookMerge::default();

    for book in local {
        match remote.remove(&book.hash) {
            Some(theirs) => {
                if theirs.is_cloud_resident() && !theirs.is_deleted() && book.downloaded_at.is_none()
                {
                    merge.download.push(book.hash.clone());
                }
                merge.library.push(overlay_book(book, theirs));
            }
            None => merge.library.push(book.clone()),
        }
    }

    let mut adopt: Vec<Book> = remote
        .into_values()
        .filter(|b| !b.is_deleted())
        .collect();
    adopt.sort_by(|a, b| a.hash.cmp(&b.hash));
    merge.adopt = adopt;
    merge
}

fn overlay_book(local: &Book, remote: Book) -> Book {
    Book {
        updated_at: local.updated_at,
        lifecycle: local.lifecycle,
        progress: local.progress,
        downloaded_at: local.downloaded_at,
        cover_image_url: local.cover_image_url.clone(),
        ..remote
    }
}

/// Result of [`merge_config`].
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigMerge {
    pub config: BookConfig,
    /// Fraction the position was advanced to, if it moved.
    pub advanced_to: Option<f64>,
}

/// Merge a pulled config into the local one.
pub fn merge_config(local: &BookConfig, remote: &BookConfig) -> ConfigMerge {
    let mut config = local.clone();
    if remote.search_config.is_some() {
        config.search_config = remote.search_config.clone();
    }
    if remote.view_settings.is_some() {
        config.view_settings = remote.view_settings.clone();
    }

    let advanced_to = match (local.fraction(), remote.fraction()) {
        (Some(ours), Some(theirs)) if theirs > ours => {
            config.location = remote.location.clone();
            config.progress = remote.progress;
            Some(theirs)
        }
        _ => None,
    };

    ConfigMerge {
        config,
        advanced_to,
    }
}

/// Merge pulled notes into the local notes of `book_hash`.
///
/// Remote notes for other books are ignored.
pub fn merge_notes(local: &[BookNote], remote: Vec<BookNote>, book_hash: &str) -> Vec<BookNote> {
    let remote: Vec<BookNote> = remote
        .into_iter()
        .filter(|n| n.book_hash == book_hash)
        .collect();
    let local_ids: HashSet<&str> = local.iter().map(|n| n.id.as_str()).collect();

    let mut merged: Vec<BookNote> = {
        let by_id: HashMap<&str, &BookNote> =
            remote.iter().map(|n| (n.id.as_str(), n)).collect();
        local
            .iter()
            .map(|n| by_id.get(n.id.as_str()).map_or_else(|| n.clone(), |r| (*r).clone()))
            .collect()
    };
    merged.extend(
        remote
            .into_iter()
            .filter(|n| !local_ids.contains(n.id.as_str())),
    );
    merged
}

/// Records changed after `watermark`.
pub fn select_pending<R: SyncRecord>(records: &[R], watermark: Timestamp) -> Vec<R> {
    records
        .iter()
        .filter(|r| r.changed_since(watermark))
        .cloned()
        .collect()
}

/// Sort notes in reading order. Notes whose location does not parse keep
/// their relative order after all others.
pub fn sort_by_location(notes: &mut [BookNote]) {
    notes.sort_by_cached_key(|n| NoteOrder(n.location().ok()));
}

#[derive(PartialEq, Eq)]
struct NoteOrder(Option<Cfi>);

impl Ord for NoteOrder {
    fn cmp(&self, other: &Self) -> Ordering {
        match (&self.0, &other.0) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

impl PartialOrd for NoteOrder {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
