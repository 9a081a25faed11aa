//! Shared API state.

use std::sync::Arc;

use clockwork_core::Scheduler;

/// Policy knobs the control plane enforces.
#[derive(Debug, Clone, Default)]
pub struct ApiConfig {
    /// Owner assigned to jobs created without one.
    pub default_owner: String,
    /// Reject creation/update of local jobs.
    pub disable_local_jobs: bool,
    /// Reject the delete-all operation.
    pub disable_delete_all: bool,
    /// Header names forwarded from a create request into the validate call.
    pub forward_headers: Vec<String>,
    /// Static bearer token required on every request when set.
    pub auth_token: Option<String>,
    /// Expose the runtime debug endpoint.
    pub profile: bool,
}

/// State handed to every handler.
pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
    pub config: ApiConfig,
    /// Client used for validate pre-checks.
    pub http: reqwest::Client,
}

impl ApiState {
    pub fn new(scheduler: Arc<Scheduler>, config: ApiConfig) -> Self {
        Self {
            scheduler,
            config,
            http: reqwest::Client::new(),
        }
    }
}

pub type SharedState = Arc<ApiState>;
