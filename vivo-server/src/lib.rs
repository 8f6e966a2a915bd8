//! vivo-server library - authoritative study store
//!
//! Applies field-device mutations, serves experiment snapshots, re-derives
//! clinical fields when an experiment's configuration changes, and reports
//! survival and humane-endpoint status.

use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod cascade;
pub mod config;
pub mod db;
pub mod error;
pub mod reconcile;
pub mod reports;
pub mod snapshot;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Held for every write (push, configuration update) so a cascade never
    /// interleaves with an observation write
    pub write_gate: Arc<Mutex<()>>,
    /// Days of observations included in a pull snapshot
    pub pull_window_days: i64,
}

impl AppState {
    pub fn new(db: SqlitePool, pull_window_days: i64) -> Self {
        Self {
            db,
            write_gate: Arc::new(Mutex::new(())),
            pull_window_days,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::sync_routes())
        .merge(api::experiment_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
