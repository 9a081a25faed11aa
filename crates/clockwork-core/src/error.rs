//! Core error types.

use thiserror::Error;

/// Errors produced by the scheduler core.
#[derive(Debug, Error)]
pub enum Error {
    /// Schedule string could not be parsed.
    #[error("Invalid schedule: {0}")]
    BadSchedule(String),

    /// Template token could not be resolved.
    #[error("Invalid template: {0}")]
    BadTemplate(String),

    /// Installing the job would create a dependency cycle.
    #[error("Dependency cycle through job {0}")]
    CycleDetected(String),

    /// No job with the given id.
    #[error("Unknown job: {0}")]
    UnknownJob(String),

    /// No run with the given id.
    #[error("Unknown run: {0}")]
    UnknownRun(String),

    /// Operation rejected by policy.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Persistence layer failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Attempt execution failure.
    #[error("Execution error: {0}")]
    Execution(String),

    /// Remote validate pre-check refused the job.
    #[error("Validation refused for job {0}")]
    ValidationRefused(String),

    /// Deadline exceeded.
    #[error("Timeout")]
    Timeout,

    /// Job definition failed validation.
    #[error("{0}")]
    InvalidJob(String),
}
