//! Job and execution-record data model.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::schedule::{IsoDuration, Schedule};

/// What a job runs when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Spawn a command on the host.
    Local,
    /// Call an HTTP endpoint.
    Remote,
}

impl Default for JobType {
    fn default() -> Self {
        JobType::Local
    }
}

/// Controller-visible job state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Disabled,
    Armed,
    Running,
    BackoffWait,
    BlockedOnParents,
}

impl Default for JobState {
    fn default() -> Self {
        JobState::Disabled
    }
}

/// Outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    /// Success or failed.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Rolling per-job counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub last_attempted_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub error_count: u64,
}

/// Remote invocation settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProperties {
    #[serde(default)]
    pub url: String,

    /// HTTP method; defaults to GET.
    #[serde(default)]
    pub method: String,

    #[serde(default)]
    pub body: String,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Response timeout in milliseconds; 0 means no deadline.
    #[serde(default)]
    pub timeout_ms: u64,

    /// Status codes treated as success; empty means `[200]`.
    #[serde(default)]
    pub expected_response_codes: Vec<u16>,
}

impl RemoteProperties {
    /// Whether `status` counts as a successful response.
    pub fn is_expected(&self, status: u16) -> bool {
        if self.expected_response_codes.is_empty() {
            status == 200
        } else {
            self.expected_response_codes.contains(&status)
        }
    }

    /// Response timeout, if one is configured.
    pub fn response_timeout(&self) -> Option<std::time::Duration> {
        (self.timeout_ms > 0).then(|| std::time::Duration::from_millis(self.timeout_ms))
    }
}

/// A scheduled job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Canonical UUID string; assigned at creation.
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub owner: String,

    #[serde(default, rename = "type")]
    pub job_type: JobType,

    #[serde(default)]
    pub disabled: bool,

    /// `R<count>/<start-rfc3339>/<iso-duration>`, or empty for a dependent job.
    #[serde(default)]
    pub schedule: String,

    /// Extra attempts after a failed one.
    #[serde(default)]
    pub retries: u32,

    /// ISO-8601 backoff between attempts of the same fire; empty uses the
    /// configured default retry delay.
    #[serde(default)]
    pub epsilon: String,

    #[serde(default)]
    pub parent_jobs: Vec<String>,

    #[serde(default)]
    pub dependent_jobs: Vec<String>,

    // Local payload.
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    // Remote payload.
    #[serde(default)]
    pub remote_properties: RemoteProperties,

    // Derived fields, maintained by the scheduler.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub state: JobState,

    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,

    /// Fires left; `None` means unbounded.
    #[serde(default)]
    pub next_remaining: Option<u32>,

    #[serde(default)]
    pub metadata: Metadata,
}

impl Job {
    /// A job with an empty schedule fires only on parent success.
    pub fn is_dependent(&self) -> bool {
        self.schedule.is_empty()
    }

    /// Parse the schedule string. Empty schedules parse to
    /// [`Schedule::Dependent`].
    pub fn parsed_schedule(&self) -> Result<Schedule, Error> {
        Schedule::parse(&self.schedule)
    }

    /// Parse the epsilon backoff, if the job has one.
    pub fn epsilon_duration(&self) -> Result<Option<IsoDuration>, Error> {
        if self.epsilon.is_empty() {
            Ok(None)
        } else {
            IsoDuration::parse(&self.epsilon).map(Some)
        }
    }

    /// Check structural validity; called before a job enters the registry.
    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::InvalidJob("job name is required".to_string()));
        }
        if self.schedule.is_empty() && self.parent_jobs.is_empty() {
            return Err(Error::InvalidJob(
                "job needs a schedule or at least one parent".to_string(),
            ));
        }
        if !self.schedule.is_empty() {
            self.parsed_schedule()?;
        }
        self.epsilon_duration()?;
        match self.job_type {
            JobType::Local => {
                if self.command.is_empty() {
                    return Err(Error::InvalidJob(
                        "local job needs a command".to_string(),
                    ));
                }
            }
            JobType::Remote => {
                if self.remote_properties.url.is_empty() {
                    return Err(Error::InvalidJob("remote job needs a url".to_string()));
                }
            }
        }
        if self.parent_jobs.iter().any(|p| p == &self.id) {
            return Err(Error::CycleDetected(self.id.clone()));
        }
        Ok(())
    }

    /// Record a terminal success at `now`.
    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.metadata.last_success = Some(now);
        self.metadata.success_count += 1;
    }

    /// Record a terminal failure at `now`.
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.metadata.last_error = Some(now);
        self.metadata.error_count += 1;
    }
}

/// The record of one fire's outcome.
///
/// Retries of the same fire update this record in place; once terminal it is
/// immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStat {
    pub id: String,
    pub job_id: String,
    pub ran_at: DateTime<Utc>,
    pub number_of_retries: u32,
    pub status: RunStatus,
    /// Wall time from `ran_at` to the terminal outcome, in milliseconds.
    pub execution_duration_ms: u64,
    /// Captured stdout or response body, bounded.
    pub output: String,
}

impl JobStat {
    /// Open a new running record for one fire of `job_id`.
    pub fn start(job_id: impl Into<String>, ran_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            job_id: job_id.into(),
            ran_at,
            number_of_retries: 0,
            status: RunStatus::Running,
            execution_duration_ms: 0,
            output: String::new(),
        }
    }

    /// Close the record with a terminal status.
    pub fn finish(&mut self, status: RunStatus, now: DateTime<Utc>, output: String) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.execution_duration_ms = (now - self.ran_at).num_milliseconds().max(0) as u64;
        self.output = output;
    }
}
