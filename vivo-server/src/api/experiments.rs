//! Experiment setup and reporting endpoints
//!
//! Thin record keeping around the sync core: create experiments, treatment
//! groups and subjects, change an experiment's configuration (which may run
//! the baseline cascade), and read survival and endpoint reports.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use vivo_common::models::{Experiment, Subject, TreatmentGroup};

use crate::cascade::{self, CascadeReport};
use crate::db::experiments::{self, ExperimentUpdate, NewExperiment};
use crate::db::subjects::{self, NewSubject};
use crate::db::treatment_groups;
use crate::error::ApiResult;
use crate::reports::{self, EndpointAlert, SurvivalReport};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NewTreatmentGroup {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExperimentUpdateResponse {
    pub experiment: Experiment,
    /// Present when the update re-derived stored fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cascade: Option<CascadeReport>,
}

/// POST /api/experiments
pub async fn create_experiment(
    State(state): State<AppState>,
    Json(new): Json<NewExperiment>,
) -> ApiResult<(StatusCode, Json<Experiment>)> {
    let _gate = state.write_gate.lock().await;
    let mut conn = state.db.acquire().await?;
    let experiment = experiments::insert(&mut conn, &new, vivo_common::time::now()).await?;
    tracing::info!(experiment_id = experiment.id, name = %experiment.name, "Experiment created");
    Ok((StatusCode::CREATED, Json(experiment)))
}

/// GET /api/experiments/:id
pub async fn get_experiment(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Experiment>> {
    let mut conn = state.db.acquire().await?;
    Ok(Json(experiments::require(&mut conn, id).await?))
}

/// PATCH /api/experiments/:id
pub async fn update_experiment(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(changes): Json<ExperimentUpdate>,
) -> ApiResult<Json<ExperimentUpdateResponse>> {
    let _gate = state.write_gate.lock().await;
    let (experiment, cascade) = cascade::apply_experiment_update(&state.db, id, &changes).await?;
    Ok(Json(ExperimentUpdateResponse { experiment, cascade }))
}

/// POST /api/experiments/:id/groups
pub async fn create_group(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(new): Json<NewTreatmentGroup>,
) -> ApiResult<(StatusCode, Json<TreatmentGroup>)> {
    let _gate = state.write_gate.lock().await;
    let mut conn = state.db.acquire().await?;
    experiments::require(&mut conn, id).await?;
    let group = treatment_groups::insert(&mut conn, id, &new.name, new.description.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(group)))
}

/// POST /api/experiments/:id/subjects
pub async fn create_subject(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(new): Json<NewSubject>,
) -> ApiResult<(StatusCode, Json<Subject>)> {
    let _gate = state.write_gate.lock().await;
    let mut conn = state.db.acquire().await?;
    experiments::require(&mut conn, id).await?;
    let subject = subjects::insert(&mut conn, id, &new).await?;
    Ok((StatusCode::CREATED, Json(subject)))
}

/// GET /api/experiments/:id/survival
pub async fn survival(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<SurvivalReport>> {
    Ok(Json(reports::survival_report(&state.db, id).await?))
}

/// GET /api/experiments/:id/alerts
pub async fn alerts(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<Vec<EndpointAlert>>> {
    Ok(Json(reports::endpoint_alerts(&state.db, id).await?))
}

pub fn experiment_routes() -> Router<AppState> {
    Router::new()
        .route("/api/experiments", post(create_experiment))
        .route("/api/experiments/:id", get(get_experiment).patch(update_experiment))
        .route("/api/experiments/:id/groups", post(create_group))
        .route("/api/experiments/:id/subjects", post(create_subject))
        .route("/api/experiments/:id/survival", get(survival))
        .route("/api/experiments/:id/alerts", get(alerts))
}
