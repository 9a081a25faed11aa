//! Aggregate stats and runtime debug handlers.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use clockwork_core::SchedulerStats;

use crate::error::ApiError;
use crate::state::SharedState;

#[derive(Debug, Serialize)]
struct StatsResponse {
    #[serde(rename = "Stats")]
    stats: SchedulerStats,
}

/// GET /api/v1/stats/
pub async fn scheduler_stats(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state.scheduler.stats();
    Ok(Json(serde_json::json!(StatsResponse { stats })))
}

/// GET /debug/runtime (mounted only with `profile = true`)
pub async fn runtime_profile(State(state): State<SharedState>) -> impl IntoResponse {
    let uptime_ms = (state.scheduler.clock().now() - state.scheduler.created_at())
        .num_milliseconds()
        .max(0);
    Json(serde_json::json!({
        "uptime_ms": uptime_ms,
        "jobs": state.scheduler.cache().len(),
        "controllers": state.scheduler.controller_count(),
    }))
}
