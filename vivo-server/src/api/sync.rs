//! Sync endpoints
//!
//! - `POST /api/sync/push` applies queued mutations, one outcome each
//! - `GET /api/sync/pull/:experiment_id` returns the experiment snapshot

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use tracing::info;
use vivo_common::wire::{PushRequest, PushResponse, Snapshot};

use crate::error::ApiResult;
use crate::{reconcile, snapshot, AppState};

/// POST /api/sync/push
pub async fn push(State(state): State<AppState>, Json(request): Json<PushRequest>) -> ApiResult<Json<PushResponse>> {
    info!(mutations = request.mutations.len(), "Push received");

    let _gate = state.write_gate.lock().await;
    let results = reconcile::push(&state.db, &request.mutations).await?;

    Ok(Json(PushResponse { results }))
}

/// GET /api/sync/pull/:experiment_id
pub async fn pull(State(state): State<AppState>, Path(experiment_id): Path<i64>) -> ApiResult<Json<Snapshot>> {
    let today = vivo_common::time::now().date_naive();
    let snapshot = snapshot::load_snapshot(&state.db, experiment_id, today, state.pull_window_days).await?;
    Ok(Json(snapshot))
}

pub fn sync_routes() -> Router<AppState> {
    Router::new()
        .route("/api/sync/push", post(push))
        .route("/api/sync/pull/:experiment_id", get(pull))
}
