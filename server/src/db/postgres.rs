//! PostgreSQL-backed [`SyncStore`].
//!
//! Timestamps are `TIMESTAMPTZ` columns and are converted to and from the
//! wire's RFC 3339 strings at this boundary. Upserts rely on the primary
//! keys `(user_id, book_hash)` and `(user_id, book_hash, id)`: an insert that
//! loses a race reports `false` instead of overwriting.

use super::{Pool, SyncStore};
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use shelfsync_engine::{
    RecordKey, SyncKind, Timestamp, WireBook, WireBookConfig, WireBookNote, WireRow,
};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};

const BOOK_COLUMNS: &str = "user_id, book_hash, format, title, author, group_id, group_name, \
     tags, progress, created_at, updated_at, deleted_at, uploaded_at";

const INSERT_BOOK: &str = r#"
    INSERT INTO books (
        user_id, book_hash, format, title, author, group_id, group_name,
        tags, progress, created_at, updated_at, deleted_at, uploaded_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
    ON CONFLICT (user_id, book_hash) DO NOTHING
"#;

const UPDATE_BOOK: &str = r#"
    UPDATE books SET
        format = $3, title = $4, author = $5, group_id = $6, group_name = $7,
        tags = $8, progress = $9, created_at = $10, updated_at = $11,
        deleted_at = $12, uploaded_at = $13
    WHERE user_id = $1 AND book_hash = $2
"#;

const CONFIG_COLUMNS: &str =
    "user_id, book_hash, location, progress, search_config, view_settings, updated_at";

const INSERT_CONFIG: &str = r#"
    INSERT INTO book_configs (
        user_id, book_hash, location, progress, search_config, view_settings, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (user_id, book_hash) DO NOTHING
"#;

const UPDATE_CONFIG: &str = r#"
    UPDATE book_configs SET
        location = $3, progress = $4, search_config = $5, view_settings = $6, updated_at = $7
    WHERE user_id = $1 AND book_hash = $2
"#;

const NOTE_COLUMNS: &str = "user_id, book_hash, id, type, cfi, text, style, color, note, \
     created_at, updated_at, deleted_at";

const INSERT_NOTE: &str = r#"
    INSERT INTO book_notes (
        user_id, book_hash, id, type, cfi, text, style, color, note,
        created_at, updated_at, deleted_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
    ON CONFLICT (user_id, book_hash, id) DO NOTHING
"#;

const UPDATE_NOTE: &str = r#"
    UPDATE book_notes SET
        type = $4, cfi = $5, text = $6, style = $7, color = $8, note = $9,
        created_at = $10, updated_at = $11, deleted_at = $12
    WHERE user_id = $1 AND book_hash = $2 AND id = $3
"#;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: Pool,
}

impl PgStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn write(&self, row: &WireRow, insert: bool) -> Result<u64, StoreError> {
        let result = match row {
            WireRow::Book(r) => {
                let sql = if insert { INSERT_BOOK } else { UPDATE_BOOK };
                bind_book(sqlx::query(sql), r)?.execute(&self.pool).await?
            }
            WireRow::Config(r) => {
                let sql = if insert { INSERT_CONFIG } else { UPDATE_CONFIG };
                bind_config(sqlx::query(sql), r)?.execute(&self.pool).await?
            }
            WireRow::Note(r) => {
                let sql = if insert { INSERT_NOTE } else { UPDATE_NOTE };
                bind_note(sqlx::query(sql), r)?.execute(&self.pool).await?
            }
        };
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SyncStore for PgStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn changed_since(
        &self,
        user_id: &str,
        kind: SyncKind,
        since: Timestamp,
        book: Option<&str>,
    ) -> Result<Vec<WireRow>, StoreError> {
        let columns = match kind {
            SyncKind::Books => BOOK_COLUMNS,
            SyncKind::Configs => CONFIG_COLUMNS,
            SyncKind::Notes => NOTE_COLUMNS,
        };
        let tombstone = match kind {
            SyncKind::Configs => "",
            _ => " OR deleted_at > $2",
        };
        let sql = format!(
            "SELECT {columns} FROM {table} \
             WHERE user_id = $1 AND (updated_at > $2{tombstone}) \
             AND ($3::TEXT IS NULL OR book_hash = $3)",
            table = kind.table(),
        );

        let rows = sqlx::query(&sql)
            .bind(user_id)
            .bind(since_bound(since))
            .bind(book)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| decode_row(kind, row).map_err(StoreError::from))
            .collect()
    }

    async fn find(
        &self,
        user_id: &str,
        kind: SyncKind,
        key: &RecordKey,
    ) -> Result<Option<WireRow>, StoreError> {
        let row = match kind {
            SyncKind::Books => {
                let sql = format!(
                    "SELECT {BOOK_COLUMNS} FROM books WHERE user_id = $1 AND book_hash = $2"
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(&key.book_hash)
                    .fetch_optional(&self.pool)
                    .await?
            }
            SyncKind::Configs => {
                let sql = format!(
                    "SELECT {CONFIG_COLUMNS} FROM book_configs \
                     WHERE user_id = $1 AND book_hash = $2"
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(&key.book_hash)
                    .fetch_optional(&self.pool)
                    .await?
            }
            SyncKind::Notes => {
                let Some(note_id) = &key.note_id else {
                    return Ok(None);
                };
                let sql = format!(
                    "SELECT {NOTE_COLUMNS} FROM book_notes \
                     WHERE user_id = $1 AND book_hash = $2 AND id = $3"
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(&key.book_hash)
                    .bind(note_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        row.map(|r| decode_row(kind, &r).map_err(StoreError::from))
            .transpose()
    }

    async fn insert_if_absent(&self, row: &WireRow) -> Result<bool, StoreError> {
        Ok(self.write(row, true).await? == 1)
    }

    async fn update(&self, row: &WireRow) -> Result<(), StoreError> {
        self.write(row, false).await?;
        Ok(())
    }
}

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

fn bind_book<'q>(query: PgQuery<'q>, row: &'q WireBook) -> Result<PgQuery<'q>, StoreError> {
    Ok(query
        .bind(&row.user_id)
        .bind(&row.book_hash)
        .bind(&row.format)
        .bind(&row.title)
        .bind(&row.author)
        .bind(&row.group_id)
        .bind(&row.group_name)
        .bind(row.tags.clone().unwrap_or_default())
        .bind(&row.progress)
        .bind(required("created_at", &row.created_at)?)
        .bind(required("updated_at", &row.updated_at)?)
        .bind(optional("deleted_at", &row.deleted_at)?)
        .bind(optional("uploaded_at", &row.uploaded_at)?))
}

fn bind_config<'q>(
    query: PgQuery<'q>,
    row: &'q WireBookConfig,
) -> Result<PgQuery<'q>, StoreError> {
    Ok(query
        .bind(&row.user_id)
        .bind(&row.book_hash)
        .bind(&row.location)
        .bind(&row.progress)
        .bind(&row.search_config)
        .bind(&row.view_settings)
        .bind(required("updated_at", &row.updated_at)?))
}

fn bind_note<'q>(query: PgQuery<'q>, row: &'q WireBookNote) -> Result<PgQuery<'q>, StoreError> {
    Ok(query
        .bind(&row.user_id)
        .bind(&row.book_hash)
        .bind(&row.id)
        .bind(&row.kind)
        .bind(&row.cfi)
        .bind(&row.text)
        .bind(&row.style)
        .bind(&row.color)
        .bind(&row.note)
        .bind(required("created_at", &row.created_at)?)
        .bind(required("updated_at", &row.updated_at)?)
        .bind(optional("deleted_at", &row.deleted_at)?))
}

fn decode_row(kind: SyncKind, row: &PgRow) -> Result<WireRow, sqlx::Error> {
    Ok(match kind {
        SyncKind::Books => {
            WireRow::Book(WireBook {
                user_id: row.try_get("user_id")?,
                book_hash: row.try_get("book_hash")?,
                format: row.try_get("format")?,
                title: row.try_get("title")?,
                author: row.try_get("author")?,
                group_id: row.try_get("group_id")?,
                group_name: row.try_get("group_name")?,
                tags: Some(row.try_get("tags")?),
                progress: row.try_get("progress")?,
                created_at: Some(iso(row.try_get("created_at")?)),
                updated_at: Some(iso(row.try_get("updated_at")?)),
                deleted_at: row.try_get::<Option<DateTime<Utc>>, _>("deleted_at")?.map(iso),
                uploaded_at: row.try_get::<Option<DateTime<Utc>>, _>("uploaded_at")?.map(iso),
            })
        }
        SyncKind::Configs => WireRow::Config(WireBookConfig {
            user_id: row.try_get("user_id")?,
            book_hash: row.try_get("book_hash")?,
            location: row.try_get("location")?,
            progress: row.try_get("progress")?,
            search_config: row.try_get("search_config")?,
            view_settings: row.try_get("view_settings")?,
            updated_at: Some(iso(row.try_get("updated_at")?)),
        }),
        SyncKind::Notes => WireRow::Note(WireBookNote {
            user_id: row.try_get("user_id")?,
            book_hash: row.try_get("book_hash")?,
            id: row.try_get("id")?,
            kind: row.try_get("type")?,
            cfi: row.try_get("cfi")?,
            text: row.try_get("text")?,
            style: row.try_get("style")?,
            color: row.try_get("color")?,
            note: row.try_get("note")?,
            created_at: Some(iso(row.try_get("created_at")?)),
            updated_at: Some(iso(row.try_get("updated_at")?)),
            deleted_at: row.try_get::<Option<DateTime<Utc>>, _>("deleted_at")?.map(iso),
        }),
    })
}

fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse(field: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("{field}: {e}")))
}

fn required(field: &str, raw: &Option<String>) -> Result<DateTime<Utc>, StoreError> {
    match raw {
        Some(raw) => parse(field, raw),
        None => Err(StoreError::Corrupt(format!("{field} is missing"))),
    }
}

fn optional(field: &str, raw: &Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.as_deref().map(|raw| parse(field, raw)).transpose()
}

fn since_bound(since: Timestamp) -> DateTime<Utc> {
    i64::try_from(since)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
