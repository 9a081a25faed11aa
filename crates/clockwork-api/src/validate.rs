//! Remote-job validate pre-check.
//!
//! Before a remote job is admitted, its templated body is POSTed to
//! `<url>/validate` with the job's headers, the caller's bearer token, and
//! any configured forwarded headers. Only a JSON `true` admits the job.

use axum::http::HeaderMap;
use tracing::warn;

use clockwork_core::{template, Job};

use crate::auth::AccessToken;
use crate::error::ApiError;
use crate::state::ApiState;

pub async fn validate_remote_job(
    state: &ApiState,
    job: &Job,
    inbound: &HeaderMap,
    token: &AccessToken,
) -> Result<(), ApiError> {
    let refused = |msg: String| {
        warn!(job = %job.name, "validate refused: {msg}");
        ApiError::Forbidden(format!("validation failed for job {}: {msg}", job.name))
    };

    let now = state.scheduler.clock().now();
    let props = &job.remote_properties;

    let url = template::render(&props.url, now).map_err(|e| refused(e.to_string()))?;
    let url = if url.ends_with('/') {
        format!("{url}validate")
    } else {
        format!("{url}/validate")
    };
    let body = template::render(&props.body, now).map_err(|e| refused(e.to_string()))?;

    let mut request = state.http.post(&url);
    if let Some(timeout) = props.response_timeout() {
        request = request.timeout(timeout);
    }
    for (name, value) in &props.headers {
        request = request.header(name, value);
    }
    if let Some(token) = &token.0 {
        request = request.bearer_auth(token);
    }
    for name in &state.config.forward_headers {
        if let Some(value) = inbound.get(name.as_str()) {
            request = request.header(name.as_str(), value);
        }
    }
    if !body.is_empty() {
        request = request.body(body);
    }

    let response = request.send().await.map_err(|e| refused(e.to_string()))?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(refused(status.to_string()));
    }

    let admitted: bool = response
        .json()
        .await
        .map_err(|_| refused("validate did not return a boolean".to_string()))?;
    if admitted {
        Ok(())
    } else {
        Err(refused("endpoint declined the job".to_string()))
    }
}
