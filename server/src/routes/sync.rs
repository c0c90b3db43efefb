//! Sync endpoint routes.

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::header::{CACHE_CONTROL, PRAGMA},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::auth::AuthUser;
use crate::error::{AppError, Result};
use crate::handlers::{handle_pull, handle_push};
use crate::AppState;
use shelfsync_engine::{PullQuery, RawSyncPayload, SyncPayload};

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/sync", get(pull_handler).post(push_handler))
}

/// POST /sync - Push rows to the server.
async fn push_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    request: std::result::Result<Json<RawSyncPayload>, JsonRejection>,
) -> Result<Json<SyncPayload>> {
    let Json(request) = request.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let response = handle_push(
        state.store.as_ref(),
        state.clock.as_ref(),
        &auth.user_id,
        request,
    )
    .await;
    Ok(Json(response))
}

/// GET /sync - Pull rows changed since a watermark.
///
/// Responses are never cached: two pulls with the same query may differ.
async fn pull_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    query: std::result::Result<Query<PullQuery>, QueryRejection>,
) -> Result<impl IntoResponse> {
    let Query(query) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    let response = handle_pull(state.store.as_ref(), &auth.user_id, &query).await?;
    Ok((
        [(CACHE_CONTROL, "no-store"), (PRAGMA, "no-cache")],
        Json(response),
    ))
}
