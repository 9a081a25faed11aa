//! Job CRUD and lifecycle handlers.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde::Serialize;
use tracing::info;

use clockwork_core::{Job, JobType};

use crate::auth::AccessToken;
use crate::error::ApiError;
use crate::state::SharedState;
use crate::validate;

#[derive(Debug, Serialize)]
struct AddJobResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct JobResponse {
    job: Job,
}

#[derive(Debug, Serialize)]
struct ListJobsResponse<'a> {
    jobs: &'a HashMap<String, Job>,
}

fn reject_local_if_disabled(state: &SharedState, job: &Job) -> Result<(), ApiError> {
    if state.config.disable_local_jobs && job.job_type == JobType::Local {
        return Err(ApiError::Forbidden("local jobs are disabled".to_string()));
    }
    Ok(())
}

/// Decode a job body; any malformed payload is the caller's fault.
fn decode_job(body: serde_json::Value) -> Result<Job, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::BadRequest(format!("invalid job body: {e}")))
}

/// POST /api/v1/job/
pub async fn create_job(
    State(state): State<SharedState>,
    Extension(token): Extension<AccessToken>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let mut job = decode_job(body)?;
    reject_local_if_disabled(&state, &job)?;

    if job.owner.is_empty() && !state.config.default_owner.is_empty() {
        job.owner = state.config.default_owner.clone();
    }

    if job.job_type == JobType::Remote {
        validate::validate_remote_job(&state, &job, &headers, &token).await?;
    }

    let id = state.scheduler.add_job(job).await?;
    info!(job_id = %id, "job created via api");
    Ok((StatusCode::CREATED, Json(AddJobResponse { id })))
}

/// GET /api/v1/job/
pub async fn list_jobs(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    // Serialize under the registry's read guard; the snapshot must not
    // outlive it.
    let jobs = state.scheduler.cache().all();
    let body = serde_json::to_value(ListJobsResponse { jobs: &jobs })
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(body))
}

/// GET /api/v1/job/{id}/
pub async fn get_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .scheduler
        .cache()
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    Ok(Json(serde_json::json!(JobResponse { job })))
}

/// PUT /api/v1/job/{id}/
pub async fn put_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let job = decode_job(body)?;
    reject_local_if_disabled(&state, &job)?;
    let updated = state.scheduler.replace_job(&id, job).await?;
    Ok(Json(serde_json::json!(JobResponse { job: updated })))
}

/// DELETE /api/v1/job/{id}/
pub async fn delete_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.delete_job(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/job/all/
pub async fn delete_all_jobs(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    if state.config.disable_delete_all {
        return Err(ApiError::Forbidden("delete-all is disabled".to_string()));
    }
    state.scheduler.delete_all().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/job/{id}/params/
pub async fn get_params(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state
        .scheduler
        .cache()
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("job {id} not found")))?;
    if job.job_type != JobType::Remote {
        return Err(ApiError::Forbidden("job is not a remote job".to_string()));
    }
    Ok(job.remote_properties.body)
}

/// PUT /api/v1/job/{id}/params/
pub async fn put_params(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.set_remote_body(&id, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/job/start/{id}/
pub async fn start_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.run_now(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/job/enable/{id}/
pub async fn enable_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.enable_job(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/job/disable/{id}/
pub async fn disable_job(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.scheduler.disable_job(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
