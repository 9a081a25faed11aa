//! File system based job store.
//!
//! Layout:
//! ```text
//! {root}/
//! ├── jobs/
//! │   └── {job-id}.json
//! └── runs/
//!     └── {run-id}.json
//! ```
//!
//! Listing runs for a job scans the runs directory; run volume per job is
//! expected to stay modest for this driver.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};

use clockwork_core::{Error, Job, JobStat, JobStore};

/// JSON-file persistence rooted at a storage directory.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create the store, making the directory layout if needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        fs::create_dir_all(root.join("jobs"))
            .await
            .map_err(|e| Error::Persistence(format!("failed to create jobs directory: {e}")))?;
        fs::create_dir_all(root.join("runs"))
            .await
            .map_err(|e| Error::Persistence(format!("failed to create runs directory: {e}")))?;
        debug!("FileStore initialized at {:?}", root);
        Ok(Self { root })
    }

    fn job_path(&self, id: &str) -> PathBuf {
        self.root.join("jobs").join(format!("{}.json", sanitize(id)))
    }

    fn run_path(&self, id: &str) -> PathBuf {
        self.root.join("runs").join(format!("{}.json", sanitize(id)))
    }

    async fn write_json<T: serde::Serialize>(path: &PathBuf, value: &T) -> Result<(), Error> {
        let content = serde_json::to_string_pretty(value)
            .map_err(|e| Error::Persistence(format!("serialize failed: {e}")))?;
        // Write to a sibling temp file and rename so a crash mid-write never
        // leaves a torn record.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)
            .await
            .map_err(|e| Error::Persistence(format!("write failed: {e}")))?;
        fs::rename(&tmp, path)
            .await
            .map_err(|e| Error::Persistence(format!("rename failed: {e}")))?;
        Ok(())
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        path: &PathBuf,
    ) -> Result<Option<T>, Error> {
        match fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| Error::Persistence(format!("deserialize failed: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Persistence(format!("read failed: {e}"))),
        }
    }

    async fn read_dir_json<T: serde::de::DeserializeOwned>(
        dir: PathBuf,
    ) -> Result<Vec<T>, Error> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| Error::Persistence(format!("read dir failed: {e}")))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Persistence(format!("read dir entry failed: {e}")))?
        {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            match fs::read_to_string(&path).await {
                Ok(content) => match serde_json::from_str::<T>(&content) {
                    Ok(value) => out.push(value),
                    Err(e) => warn!("skipping unreadable record {:?}: {e}", path),
                },
                Err(e) => warn!("skipping unreadable file {:?}: {e}", path),
            }
        }
        Ok(out)
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl JobStore for FileStore {
    async fn save_job(&self, job: &Job) -> Result<(), Error> {
        let path = self.job_path(&job.id);
        Self::write_json(&path, job).await?;
        debug!(job_id = %job.id, "saved job to {:?}", path);
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> Result<(), Error> {
        let path = self.job_path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Persistence(format!("delete failed: {e}"))),
        }
    }

    async fn list_jobs(&self) -> Result<Vec<Job>, Error> {
        let jobs = Self::read_dir_json(self.root.join("jobs")).await?;
        debug!("loaded {} jobs from {:?}", jobs.len(), self.root);
        Ok(jobs)
    }

    async fn save_run(&self, run: &JobStat) -> Result<(), Error> {
        Self::write_json(&self.run_path(&run.id), run).await
    }

    async fn update_run(&self, run: &JobStat) -> Result<(), Error> {
        let path = self.run_path(&run.id);
        if !path.exists() {
            return Err(Error::UnknownRun(run.id.clone()));
        }
        Self::write_json(&path, run).await
    }

    async fn get_run(&self, id: &str) -> Result<Option<JobStat>, Error> {
        Self::read_json(&self.run_path(id)).await
    }

    async fn list_runs(&self, job_id: &str) -> Result<Vec<JobStat>, Error> {
        let mut runs: Vec<JobStat> = Self::read_dir_json(self.root.join("runs")).await?;
        runs.retain(|r| r.job_id == job_id);
        runs.sort_by_key(|r| r.ran_at);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use clockwork_core::{JobType, RunStatus};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn sample_job() -> Job {
        Job {
            id: Uuid::new_v4().to_string(),
            name: "sample".to_string(),
            owner: String::new(),
            job_type: JobType::Local,
            disabled: false,
            schedule: "R1/2030-01-01T00:00:00Z/PT1S".to_string(),
            retries: 0,
            epsilon: String::new(),
            parent_jobs: Vec::new(),
            dependent_jobs: Vec::new(),
            command: "true".to_string(),
            args: Vec::new(),
            env: Default::default(),
            remote_properties: Default::default(),
            created_at: Some(Utc::now()),
            state: Default::default(),
            next_run_at: None,
            next_remaining: None,
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_save_and_list_jobs() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        let a = sample_job();
        let b = sample_job();
        store.save_job(&a).await.unwrap();
        store.save_job(&b).await.unwrap();

        let jobs = store.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().any(|j| j.id == a.id));
        assert!(jobs.iter().any(|j| j.id == b.id));
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        let mut job = sample_job();
        store.save_job(&job).await.unwrap();
        job.metadata.success_count = 9;
        store.save_job(&job).await.unwrap();

        let jobs = store.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].metadata.success_count, 9);
    }

    #[tokio::test]
    async fn test_delete_job() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        let job = sample_job();
        store.save_job(&job).await.unwrap();
        store.delete_job(&job.id).await.unwrap();
        assert!(store.list_jobs().await.unwrap().is_empty());

        // Deleting a missing job is not an error.
        store.delete_job("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn test_run_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        let t0 = Utc::now();
        let mut run = JobStat::start("job-1", t0);
        store.save_run(&run).await.unwrap();

        run.finish(RunStatus::Failed, t0 + chrono::Duration::seconds(2), "boom".into());
        store.update_run(&run).await.unwrap();

        let got = store.get_run(&run.id).await.unwrap().unwrap();
        assert_eq!(got.status, RunStatus::Failed);
        assert_eq!(got.output, "boom");
        assert_eq!(got.execution_duration_ms, 2000);
    }

    #[tokio::test]
    async fn test_update_missing_run_fails() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();
        let run = JobStat::start("job-1", Utc::now());
        assert!(matches!(
            store.update_run(&run).await,
            Err(Error::UnknownRun(_))
        ));
    }

    #[tokio::test]
    async fn test_list_runs_filters_and_orders() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();

        let t0 = Utc::now();
        let second = JobStat::start("job-1", t0 + chrono::Duration::seconds(5));
        let first = JobStat::start("job-1", t0);
        let other = JobStat::start("job-2", t0);
        store.save_run(&second).await.unwrap();
        store.save_run(&first).await.unwrap();
        store.save_run(&other).await.unwrap();

        let runs = store.list_runs("job-1").await.unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, first.id);
        assert_eq!(runs[1].id, second.id);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_skipped() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).await.unwrap();
        store.save_job(&sample_job()).await.unwrap();

        tokio::fs::write(dir.path().join("jobs/broken.json"), "{not json")
            .await
            .unwrap();

        assert_eq!(store.list_jobs().await.unwrap().len(), 1);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("abc-123_x"), "abc-123_x");
        assert_eq!(sanitize("../../etc/passwd"), "______etc_passwd");
    }
}
