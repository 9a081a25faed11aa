//! # Clockwork API
//!
//! The REST control plane. Everything here is a thin adapter over the
//! scheduler core: handlers translate HTTP to scheduler calls and map core
//! errors onto status codes.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod server;
pub mod state;
pub mod validate;

pub use error::ApiError;
pub use server::{ApiServer, make_service};
pub use state::{ApiConfig, ApiState, SharedState};
