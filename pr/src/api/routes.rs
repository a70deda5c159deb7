//! Run endpoints

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use runstore::Run;
use tracing::debug;

use crate::manifest::Manifest;
use crate::orchestrator::Orchestrator;

use super::error::ApiError;

pub type AppState = Arc<Orchestrator>;

/// POST /plans/:plan_id/runs
pub async fn create_run(
    State(orch): State<AppState>,
    Path(plan_id): Path<String>,
) -> Result<(StatusCode, Json<Run>), ApiError> {
    debug!(%plan_id, "create_run: called");
    let run = orch.enqueue(&plan_id).await?;
    Ok((StatusCode::CREATED, Json(run)))
}

/// GET /plans/:plan_id/runs
pub async fn list_runs(State(orch): State<AppState>, Path(plan_id): Path<String>) -> Result<Json<Vec<Run>>, ApiError> {
    debug!(%plan_id, "list_runs: called");
    Ok(Json(orch.list_runs(&plan_id).await?))
}

/// GET /plans/:plan_id/runs/:run_id
pub async fn get_run(
    State(orch): State<AppState>,
    Path((plan_id, run_id)): Path<(String, String)>,
) -> Result<Json<Run>, ApiError> {
    Ok(Json(orch.get_run(&plan_id, &run_id).await?))
}

/// POST /plans/:plan_id/runs/:run_id/cancel
pub async fn cancel_run(
    State(orch): State<AppState>,
    Path((plan_id, run_id)): Path<(String, String)>,
) -> Result<Json<Run>, ApiError> {
    debug!(%plan_id, %run_id, "cancel_run: called");
    Ok(Json(orch.cancel(&plan_id, &run_id).await?))
}

/// GET /plans/:plan_id/runs/:run_id/manifest
pub async fn get_manifest(
    State(orch): State<AppState>,
    Path((plan_id, run_id)): Path<(String, String)>,
) -> Result<Json<Manifest>, ApiError> {
    Ok(Json(orch.manifest(&plan_id, &run_id).await?))
}

/// GET /plans/:plan_id/runs/:run_id/log
pub async fn get_log(
    State(orch): State<AppState>,
    Path((plan_id, run_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let text = orch.log(&plan_id, &run_id).await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text))
}
