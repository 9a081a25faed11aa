//! Scheduler: owns the registry, the store, and every job controller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::JobCache;
use crate::clock::SharedClock;
use crate::controller::{fire_job, ControllerHandle, FireReason, JobController};
use crate::error::Error;
use crate::executor::Executor;
use crate::job::{Job, JobState, RunStatus};
use crate::stats::SchedulerStats;
use crate::store::JobStore;

/// Marker written into runs that were still `running` when the process
/// died.
const PROCESS_EXITED: &str = "process exited";

/// Tunables for the scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Backoff between attempts when a job has no epsilon.
    pub retry_delay: Duration,
    /// How long shutdown waits for in-flight attempts.
    pub grace: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(1),
            grace: Duration::from_secs(5),
        }
    }
}

/// State shared between the scheduler facade and its controllers.
pub(crate) struct SchedulerInner {
    pub(crate) cache: Arc<JobCache>,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) executor: Arc<Executor>,
    pub(crate) clock: SharedClock,
    pub(crate) handles: RwLock<HashMap<String, ControllerHandle>>,
    pub(crate) retry_delay: Duration,
    pub(crate) root_cancel: CancellationToken,
    pub(crate) accepting: AtomicBool,
}

/// The scheduler service.
///
/// All control-plane mutations go through here so the registry, the store,
/// and the controller set stay consistent: an operation has fully taken
/// effect by the time it returns.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    created_at: DateTime<Utc>,
    grace: Duration,
}

impl Scheduler {
    pub fn new(store: Arc<dyn JobStore>, clock: SharedClock, options: SchedulerOptions) -> Self {
        let inner = Arc::new(SchedulerInner {
            cache: Arc::new(JobCache::new()),
            store,
            executor: Arc::new(Executor::new(clock.clone())),
            clock: clock.clone(),
            handles: RwLock::new(HashMap::new()),
            retry_delay: options.retry_delay,
            root_cancel: CancellationToken::new(),
            accepting: AtomicBool::new(true),
        });
        Self {
            inner,
            created_at: clock.now(),
            grace: options.grace,
        }
    }

    pub fn cache(&self) -> &Arc<JobCache> {
        &self.inner.cache
    }

    pub fn clock(&self) -> &SharedClock {
        &self.inner.clock
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Aggregate snapshot over every job.
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats::roll_up(&self.inner.cache, self.created_at)
    }

    /// Load persisted jobs, reconcile stale runs, and arm timers.
    pub async fn start(&self) -> Result<(), Error> {
        let jobs = self.inner.store.list_jobs().await?;
        let now = self.inner.clock.now();

        for job in &jobs {
            self.inner.cache.install_recovered(job.clone());
        }
        self.inner.cache.rebuild_dependents();

        // No execution survives a restart: anything still `running` failed.
        for job in &jobs {
            let runs = self.inner.store.list_runs(&job.id).await?;
            for mut run in runs {
                if run.status == RunStatus::Running {
                    warn!(job_id = %job.id, run_id = %run.id, "marking interrupted run failed");
                    run.status = RunStatus::Failed;
                    run.execution_duration_ms =
                        (now - run.ran_at).num_milliseconds().max(0) as u64;
                    run.output = PROCESS_EXITED.to_string();
                    self.inner.store.update_run(&run).await?;
                }
                self.inner.cache.add_run(run);
            }
        }

        let snapshot: Vec<Job> = self.inner.cache.all().values().cloned().collect();
        let mut armed = 0usize;
        for job in snapshot {
            if job.disabled {
                let _ = self.inner.cache.update(&job.id, |j| {
                    j.state = JobState::Disabled;
                    j.next_run_at = None;
                });
            } else {
                self.spawn_controller(&job);
                armed += 1;
            }
        }

        info!(total = jobs.len(), armed, "scheduler started");
        Ok(())
    }

    /// Create a job. Returns the assigned id.
    pub async fn add_job(&self, mut job: Job) -> Result<String, Error> {
        self.ensure_accepting()?;

        if job.id.is_empty() {
            job.id = Uuid::new_v4().to_string();
        }
        let now = self.inner.clock.now();
        job.created_at = Some(now);
        job.metadata = Default::default();
        job.dependent_jobs = Vec::new();
        self.prime_derived_fields(&mut job, now)?;

        self.inner.cache.insert(job.clone())?;
        if let Err(e) = self.inner.store.save_job(&job).await {
            let _ = self.inner.cache.delete(&job.id);
            return Err(e);
        }

        if !job.disabled {
            self.spawn_controller(&job);
        }
        info!(job_id = %job.id, name = %job.name, "job created");
        Ok(job.id)
    }

    /// Replace a job in place, keeping its id, creation time, and counters.
    pub async fn replace_job(&self, id: &str, mut job: Job) -> Result<Job, Error> {
        self.ensure_accepting()?;

        let old = self
            .inner
            .cache
            .get(id)
            .ok_or_else(|| Error::UnknownJob(id.to_string()))?;

        job.id = old.id.clone();
        job.created_at = old.created_at;
        job.metadata = old.metadata.clone();
        job.dependent_jobs = Vec::new();
        let now = self.inner.clock.now();
        self.prime_derived_fields(&mut job, now)?;

        self.inner.cache.replace(job.clone())?;
        if let Err(e) = self.inner.store.save_job(&job).await {
            let _ = self.inner.cache.replace(old);
            return Err(e);
        }

        self.stop_controller(id);
        if !job.disabled {
            self.spawn_controller(&job);
        }
        info!(job_id = %id, "job replaced");
        self.inner
            .cache
            .get(id)
            .ok_or_else(|| Error::UnknownJob(id.to_string()))
    }

    /// Delete a job and, recursively, every job that depends on it.
    pub async fn delete_job(&self, id: &str) -> Result<(), Error> {
        if !self.inner.cache.contains(id) {
            return Err(Error::UnknownJob(id.to_string()));
        }

        let mut queue = vec![id.to_string()];
        while let Some(current) = queue.pop() {
            self.stop_controller(&current);
            let removed = match self.inner.cache.delete(&current) {
                Ok(job) => job,
                // Already removed through another dependency path.
                Err(_) => continue,
            };
            self.inner.store.delete_job(&current).await?;
            debug!(job_id = %current, "job deleted");
            queue.extend(removed.dependent_jobs);
        }
        Ok(())
    }

    /// Delete every job.
    pub async fn delete_all(&self) -> Result<(), Error> {
        let ids: Vec<String> = self.inner.cache.all().keys().cloned().collect();
        for id in ids {
            match self.delete_job(&id).await {
                Ok(()) => {}
                // Cascades may have removed it already.
                Err(Error::UnknownJob(_)) => {}
                Err(e) => return Err(e),
            }
        }
        info!("all jobs deleted");
        Ok(())
    }

    /// Re-arm a disabled job.
    pub async fn enable_job(&self, id: &str) -> Result<(), Error> {
        let job = self
            .inner
            .cache
            .get(id)
            .ok_or_else(|| Error::UnknownJob(id.to_string()))?;
        if !job.disabled {
            return Ok(());
        }

        self.inner.cache.update(id, |j| j.disabled = false)?;
        let job = self.inner.cache.get(id).unwrap_or(job);
        self.inner.store.save_job(&job).await?;
        self.spawn_controller(&job);
        info!(job_id = %id, "job enabled");
        Ok(())
    }

    /// Cancel the job's timer and any in-flight attempt, then mark it
    /// disabled.
    pub async fn disable_job(&self, id: &str) -> Result<(), Error> {
        if !self.inner.cache.contains(id) {
            return Err(Error::UnknownJob(id.to_string()));
        }

        // Flag first so a controller mid-loop can no longer re-arm, then
        // cancel its timer and any in-flight attempt.
        self.inner.cache.update(id, |j| {
            j.disabled = true;
            j.state = JobState::Disabled;
            j.next_run_at = None;
        })?;
        self.stop_controller(id);
        let job = self
            .inner
            .cache
            .get(id)
            .ok_or_else(|| Error::UnknownJob(id.to_string()))?;
        self.inner.store.save_job(&job).await?;
        info!(job_id = %id, "job disabled");
        Ok(())
    }

    /// Fire a job immediately, cancelling its pending timer.
    pub async fn run_now(&self, id: &str) -> Result<(), Error> {
        if !self.inner.cache.contains(id) {
            return Err(Error::UnknownJob(id.to_string()));
        }

        let queued = {
            let handles = self.inner.handles.read();
            handles
                .get(id)
                .map(|h| h.fire(FireReason::Manual))
                .unwrap_or(false)
        };
        if queued {
            return Ok(());
        }

        // No live controller (disabled job): run the fire on its own task.
        let inner = self.inner.clone();
        let job_id = id.to_string();
        let cancel = self.inner.root_cancel.child_token();
        tokio::spawn(async move {
            fire_job(&inner, &job_id, &cancel, FireReason::Manual).await;
        });
        Ok(())
    }

    /// Replace a remote job's request body. The timer is left alone; the
    /// new body takes effect on the next fire.
    pub async fn set_remote_body(&self, id: &str, body: String) -> Result<(), Error> {
        let job = self
            .inner
            .cache
            .get(id)
            .ok_or_else(|| Error::UnknownJob(id.to_string()))?;
        if job.job_type != crate::job::JobType::Remote {
            return Err(Error::Forbidden("job is not a remote job".to_string()));
        }

        self.inner
            .cache
            .update(id, |j| j.remote_properties.body = body)?;
        let job = self
            .inner
            .cache
            .get(id)
            .ok_or_else(|| Error::UnknownJob(id.to_string()))?;
        self.inner.store.save_job(&job).await?;
        Ok(())
    }

    /// Number of live job controllers.
    pub fn controller_count(&self) -> usize {
        self.inner.handles.read().len()
    }

    /// Overwrite the status of a recorded run. The duration is recomputed
    /// only when a terminal status lands on a still-running record.
    pub async fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<(), Error> {
        let mut run = self
            .inner
            .cache
            .get_run(run_id)
            .ok_or_else(|| Error::UnknownRun(run_id.to_string()))?;

        let was_running = run.status == RunStatus::Running;
        run.status = status;
        if status.is_terminal() && was_running {
            run.execution_duration_ms =
                (self.inner.clock.now() - run.ran_at).num_milliseconds().max(0) as u64;
        }

        self.inner.cache.update_run(run.clone())?;
        self.inner.store.update_run(&run).await?;
        Ok(())
    }

    /// Stop accepting mutations, cancel every timer and in-flight attempt,
    /// and wait out the grace period.
    pub async fn shutdown(&self) {
        info!("scheduler shutting down");
        self.inner.accepting.store(false, Ordering::SeqCst);
        self.inner.root_cancel.cancel();

        let handles: Vec<ControllerHandle> = {
            let mut map = self.inner.handles.write();
            map.drain().map(|(_, h)| h).collect()
        };
        for handle in &handles {
            handle.cancel();
        }

        let joins = handles.into_iter().map(|h| h.join);
        if tokio::time::timeout(self.grace, futures::future::join_all(joins))
            .await
            .is_err()
        {
            warn!("grace period elapsed with attempts still in flight");
        }
        info!("scheduler stopped");
    }

    fn ensure_accepting(&self) -> Result<(), Error> {
        if self.inner.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::Forbidden("scheduler is shutting down".to_string()))
        }
    }

    /// Compute the derived fields a job carries before its controller takes
    /// over.
    fn prime_derived_fields(&self, job: &mut Job, now: DateTime<Utc>) -> Result<(), Error> {
        let schedule = job.parsed_schedule()?;
        job.next_remaining = schedule.initial_remaining();
        job.next_run_at = if job.disabled {
            None
        } else {
            schedule.next_run(now, job.next_remaining)
        };
        job.state = if job.disabled {
            JobState::Disabled
        } else if job.is_dependent() {
            JobState::BlockedOnParents
        } else {
            JobState::Armed
        };
        Ok(())
    }

    fn spawn_controller(&self, job: &Job) {
        let handle = JobController::spawn(self.inner.clone(), job);
        if let Some(old) = self.inner.handles.write().insert(job.id.clone(), handle) {
            old.cancel();
        }
    }

    fn stop_controller(&self, id: &str) {
        if let Some(handle) = self.inner.handles.write().remove(id) {
            handle.cancel();
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
