//! Pull handler - serves rows changed since a watermark.

use crate::db::SyncStore;
use crate::error::Result;
use shelfsync_engine::{PullQuery, SyncPayload};

/// Collect every row of the requested kinds owned by `user_id` that changed
/// after `query.since`.
pub async fn handle_pull(
    store: &dyn SyncStore,
    user_id: &str,
    query: &PullQuery,
) -> Result<SyncPayload> {
    let mut payload = SyncPayload::default();

    for kind in query.kinds() {
        let rows = store
            .changed_since(user_id, kind, query.since, query.book.as_deref())
            .await?;
        tracing::debug!(
            user = user_id,
            %kind,
            since = query.since,
            book = query.book.as_deref().unwrap_or("*"),
            count = rows.len(),
            "pull"
        );
        for row in rows {
            payload.push_row(row);
        }
    }

    Ok(payload)
}
