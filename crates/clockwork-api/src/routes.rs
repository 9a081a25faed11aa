//! Route table.
//!
//! Everything lives under `/api/v1/`:
//!
//! ```text
//! POST   /api/v1/job/                          create a job
//! GET    /api/v1/job/                          list jobs
//! DELETE /api/v1/job/all/                      delete every job
//! POST   /api/v1/job/start/{id}/               fire now
//! POST   /api/v1/job/enable/{id}/              enable
//! POST   /api/v1/job/disable/{id}/             disable
//! GET    /api/v1/job/{id}/                     fetch a job
//! PUT    /api/v1/job/{id}/                     replace a job
//! DELETE /api/v1/job/{id}/                     delete a job
//! GET    /api/v1/job/{id}/params/              fetch remote body
//! PUT    /api/v1/job/{id}/params/              replace remote body
//! GET    /api/v1/job/{id}/executions/          list runs
//! GET    /api/v1/job/{id}/executions/{run_id}/ fetch one run
//! PUT    /api/v1/job/{id}/executions/{run_id}/ overwrite a run's status
//! GET    /api/v1/stats/                        aggregate stats
//! ```
//!
//! Trailing slashes are tolerated via path normalization in the server
//! wrapper.

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::handlers::{jobs, runs, stats};
use crate::state::SharedState;

/// Request bodies are limited to 1 MiB.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the control-plane router.
pub fn router(state: SharedState) -> Router {
    let api = Router::new()
        .route("/job", post(jobs::create_job).get(jobs::list_jobs))
        .route("/job/all", delete(jobs::delete_all_jobs))
        .route("/job/start/{id}", post(jobs::start_job))
        .route("/job/enable/{id}", post(jobs::enable_job))
        .route("/job/disable/{id}", post(jobs::disable_job))
        .route(
            "/job/{id}",
            get(jobs::get_job).put(jobs::put_job).delete(jobs::delete_job),
        )
        .route(
            "/job/{id}/params",
            get(jobs::get_params).put(jobs::put_params),
        )
        .route("/job/{id}/executions", get(runs::list_runs))
        .route(
            "/job/{id}/executions/{run_id}",
            get(runs::get_run).put(runs::put_run),
        )
        .route("/stats", get(stats::scheduler_stats));

    let mut app = Router::new().nest("/api/v1", api);
    if state.config.profile {
        app = app.route("/debug/runtime", get(stats::runtime_profile));
    }

    app.layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_auth,
    ))
    .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

#[cfg(test)]
#[path = "routes_tests.rs"]
mod tests;
