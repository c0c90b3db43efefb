//! Shelfsync Server - reconciliation endpoint for the shelfsync sync engine.
//!
//! One endpoint, `/sync`: `GET` serves rows changed after a watermark and
//! `POST` reconciles client rows against the store with last-write-wins.
//! Every request is authenticated with an HS256 bearer token whose `sub`
//! claim owns the rows it touches.
//!
//! The binary in `main.rs` wires a [`db::PgStore`] when `DATABASE_URL` is set;
//! tests build the router over a [`db::MemoryStore`].

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;

use crate::config::Config;
use crate::db::SyncStore;
use axum::Router;
use shelfsync_engine::Clock;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SyncStore>,
    /// Mints `updated_at` for every written row.
    pub clock: Arc<dyn Clock>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn SyncStore>, clock: Arc<dyn Clock>, config: Config) -> Self {
        Self {
            store,
            clock,
            config: Arc::new(config),
        }
    }
}

/// Build the application router.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
