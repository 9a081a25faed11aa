//! Execution-record handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use clockwork_core::{JobStat, RunStatus};

use crate::error::ApiError;
use crate::state::SharedState;

#[derive(Debug, Serialize)]
struct ListRunsResponse {
    job_stats: Vec<JobStat>,
}

#[derive(Debug, Serialize)]
struct RunResponse {
    job_run: JobStat,
}

/// Body of a run-status overwrite.
#[derive(Debug, Deserialize)]
pub struct RunStatusUpdate {
    pub status: RunStatus,
}

fn decode_status(body: serde_json::Value) -> Result<RunStatusUpdate, ApiError> {
    serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid status body: {e}")))
}

/// GET /api/v1/job/{id}/executions/
pub async fn list_runs(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.scheduler.cache().contains(&id) {
        return Err(ApiError::NotFound(format!("job {id} not found")));
    }
    let job_stats = state.scheduler.cache().runs_for(&id);
    Ok(Json(serde_json::json!(ListRunsResponse { job_stats })))
}

/// GET /api/v1/job/{id}/executions/{run_id}/
pub async fn get_run(
    State(state): State<SharedState>,
    Path((_, run_id)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let run = state
        .scheduler
        .cache()
        .get_run(&run_id)
        .ok_or_else(|| ApiError::NotFound(format!("run {run_id} not found")))?;
    Ok(Json(serde_json::json!(RunResponse { job_run: run })))
}

/// PUT /api/v1/job/{id}/executions/{run_id}/
pub async fn put_run(
    State(state): State<SharedState>,
    Path((_, run_id)): Path<(String, String)>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let update = decode_status(body)?;
    state
        .scheduler
        .update_run_status(&run_id, update.status)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
