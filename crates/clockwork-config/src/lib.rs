//! # Clockwork Config
//!
//! Configuration management for the clockwork scheduler daemon.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationIssue, ValidationResult};
