//! HTTP server wrapper.

use std::net::SocketAddr;

use axum::extract::Request;
use axum::ServiceExt;
use tokio::net::TcpListener;
use tower::Layer;
use tower_http::normalize_path::{NormalizePath, NormalizePathLayer};
use tracing::info;

use crate::routes;
use crate::state::SharedState;

/// Router wrapped so `/job/` and `/job` both resolve.
pub fn make_service(state: SharedState) -> NormalizePath<axum::Router> {
    NormalizePathLayer::trim_trailing_slash().layer(routes::router(state))
}

/// The control-plane server.
pub struct ApiServer {
    host: String,
    port: u16,
    state: SharedState,
}

impl ApiServer {
    pub fn new(host: impl Into<String>, port: u16, state: SharedState) -> Self {
        Self {
            host: host.into(),
            port,
            state,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Serve until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), Box<dyn std::error::Error>>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let service = make_service(self.state.clone());
        let addr: SocketAddr = self.addr().parse()?;
        let listener = TcpListener::bind(addr).await?;

        info!("control plane listening on {addr}");
        axum::serve(
            listener,
            ServiceExt::<Request>::into_make_service(service),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ApiConfig, ApiState};
    use clockwork_core::{MemoryStore, Scheduler, SchedulerOptions, SystemClock};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_server_addr_format() {
        let scheduler = Arc::new(Scheduler::new(
            Arc::new(MemoryStore::new()),
            Arc::new(SystemClock),
            SchedulerOptions::default(),
        ));
        let state = Arc::new(ApiState::new(scheduler, ApiConfig::default()));
        let server = ApiServer::new("127.0.0.1", 8000, state);
        assert_eq!(server.addr(), "127.0.0.1:8000");
    }
}
