//! Persistence interface and the in-memory driver.
//!
//! File and postgres drivers live in the `clockwork-store` crate.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Error;
use crate::job::{Job, JobStat};

/// Durable storage for jobs and execution records.
///
/// Every operation completes its write before returning and fails
/// atomically.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or overwrite a job record.
    async fn save_job(&self, job: &Job) -> Result<(), Error>;

    /// Remove a job record.
    async fn delete_job(&self, id: &str) -> Result<(), Error>;

    /// Load every persisted job.
    async fn list_jobs(&self) -> Result<Vec<Job>, Error>;

    /// Insert a new execution record.
    async fn save_run(&self, run: &JobStat) -> Result<(), Error>;

    /// Overwrite an existing execution record.
    async fn update_run(&self, run: &JobStat) -> Result<(), Error>;

    /// Load one execution record.
    async fn get_run(&self, id: &str) -> Result<Option<JobStat>, Error>;

    /// Load every execution record for a job, oldest first.
    async fn list_runs(&self, job_id: &str) -> Result<Vec<JobStat>, Error>;
}

/// In-memory store for tests and ephemeral deployments.
pub struct MemoryStore {
    jobs: tokio::sync::RwLock<HashMap<String, Job>>,
    runs: tokio::sync::RwLock<HashMap<String, JobStat>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            jobs: tokio::sync::RwLock::new(HashMap::new()),
            runs: tokio::sync::RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn save_job(&self, job: &Job) -> Result<(), Error> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> Result<(), Error> {
        let mut jobs = self.jobs.write().await;
        jobs.remove(id);
        Ok(())
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, Error> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().cloned().collect())
    }

    async fn save_run(&self, run: &JobStat) -> Result<(), Error> {
        let mut runs = self.runs.write().await;
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn update_run(&self, run: &JobStat) -> Result<(), Error> {
        let mut runs = self.runs.write().await;
        if !runs.contains_key(&run.id) {
            return Err(Error::UnknownRun(run.id.clone()));
        }
        runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, id: &str) -> Result<Option<JobStat>, Error> {
        let runs = self.runs.read().await;
        Ok(runs.get(id).cloned())
    }

    async fn list_runs(&self, job_id: &str) -> Result<Vec<JobStat>, Error> {
        let runs = self.runs.read().await;
        let mut out: Vec<_> = runs
            .values()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| r.ran_at);
        Ok(out)
    }
}
