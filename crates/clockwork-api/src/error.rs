//! API error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use clockwork_core::Error;

/// Errors a handler can return; each maps to one status code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::BadSchedule(_)
            | Error::BadTemplate(_)
            | Error::CycleDetected(_)
            | Error::InvalidJob(_) => ApiError::BadRequest(err.to_string()),
            Error::Forbidden(_) | Error::ValidationRefused(_) => {
                ApiError::Forbidden(err.to_string())
            }
            Error::UnknownJob(_) | Error::UnknownRun(_) => ApiError::NotFound(err.to_string()),
            Error::Persistence(_) | Error::Execution(_) | Error::Timeout => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
