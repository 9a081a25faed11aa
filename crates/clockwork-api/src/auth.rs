//! Bearer-token authentication middleware.
//!
//! Applied uniformly to every route. The presented token (if any) is
//! attached to the request so the validate pre-check can forward it.

use axum::extract::{Request, State};
use axum::http::{header::AUTHORIZATION, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::state::SharedState;

/// Token presented on the inbound request, if any.
#[derive(Debug, Clone, Default)]
pub struct AccessToken(pub Option<String>);

/// Check the static token (when configured) and stash the presented token
/// in request extensions.
pub async fn require_auth(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);

    if let Some(required) = &state.config.auth_token {
        if presented.as_deref() != Some(required.as_str()) {
            return (
                StatusCode::UNAUTHORIZED,
                axum::Json(serde_json::json!({ "error": "invalid or missing bearer token" })),
            )
                .into_response();
        }
    }

    request.extensions_mut().insert(AccessToken(presented));
    next.run(request).await
}
