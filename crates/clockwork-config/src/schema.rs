//! Configuration schema definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Owner assigned to jobs created without one.
    #[serde(default)]
    pub default_owner: String,

    /// Expose the runtime debug endpoint.
    #[serde(default)]
    pub profile: bool,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub persistence: PersistenceConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

/// Job policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Reject creation and update of local (command) jobs.
    #[serde(default)]
    pub disable_local_jobs: bool,

    /// Reject the delete-all operation.
    #[serde(default)]
    pub disable_delete_all: bool,

    /// Retry backoff used when a job has no epsilon of its own.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            disable_local_jobs: false,
            disable_delete_all: false,
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_retry_delay_ms() -> u64 {
    1000
}

/// Remote job configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Header names forwarded from the create request into the validate call.
    #[serde(default)]
    pub headers: Vec<String>,
}

/// Persistence driver selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersistenceKind {
    Memory,
    File,
    Postgres,
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_persistence_kind")]
    pub kind: PersistenceKind,

    /// Storage directory for the file driver.
    #[serde(default = "default_persistence_path")]
    pub path: PathBuf,

    /// Connection string for the postgres driver.
    #[serde(default)]
    pub url: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            kind: default_persistence_kind(),
            path: default_persistence_path(),
            url: String::new(),
        }
    }
}

fn default_persistence_kind() -> PersistenceKind {
    PersistenceKind::Memory
}

fn default_persistence_path() -> PathBuf {
    PathBuf::from("./clockwork-data")
}

/// Authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Static bearer token required on every API request when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Shutdown configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Grace period for in-flight attempts, in milliseconds.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
        }
    }
}

fn default_grace_ms() -> u64 {
    5000
}
