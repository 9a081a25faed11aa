//! Per-job controller: owns the timer and drives the fire/retry state
//! machine.
//!
//! One controller task exists per enabled job. It arms a timer from the
//! job's schedule, performs the attempt sequence when the timer (or a
//! manual/parent event) fires, applies retry backoff, records the JobStat,
//! fires dependents on terminal success, and re-arms.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::job::{Job, JobState, JobStat, RunStatus};
use crate::schedule::Schedule;
use crate::scheduler::SchedulerInner;

/// Why a fire happened.
#[derive(Debug, Clone)]
pub(crate) enum FireReason {
    /// The armed timer elapsed.
    Timer,
    /// A run-now request.
    Manual,
    /// A parent job completed successfully.
    ParentSuccess { parent: String },
}

/// Scheduler-side handle to a running controller.
pub(crate) struct ControllerHandle {
    fire_tx: mpsc::UnboundedSender<FireReason>,
    cancel: CancellationToken,
    pub(crate) join: JoinHandle<()>,
}

impl ControllerHandle {
    /// Queue a fire event; false if the controller is gone.
    pub(crate) fn fire(&self, reason: FireReason) -> bool {
        self.fire_tx.send(reason).is_ok()
    }

    /// Cancel the timer and any in-flight attempt.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }
}

pub(crate) struct JobController {
    job_id: String,
    schedule: Schedule,
    inner: Arc<SchedulerInner>,
    cancel: CancellationToken,
    fire_rx: mpsc::UnboundedReceiver<FireReason>,
}

impl JobController {
    /// Spawn a controller task for `job` and return its handle.
    pub(crate) fn spawn(inner: Arc<SchedulerInner>, job: &Job) -> ControllerHandle {
        let schedule = job.parsed_schedule().unwrap_or_else(|e| {
            // The registry validated the schedule; reaching this means the
            // persisted record was edited out-of-band.
            error!(job_id = %job.id, "unparseable schedule, treating as dependent: {e}");
            Schedule::Dependent
        });
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let cancel = inner.root_cancel.child_token();

        let controller = JobController {
            job_id: job.id.clone(),
            schedule,
            inner,
            cancel: cancel.clone(),
            fire_rx,
        };
        let join = tokio::spawn(controller.run());

        ControllerHandle {
            fire_tx,
            cancel,
            join,
        }
    }

    async fn run(mut self) {
        debug!(job_id = %self.job_id, "controller started");
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(job) = self.inner.cache.get(&self.job_id) else {
                break;
            };
            if job.disabled {
                break;
            }

            let now = self.inner.clock.now();
            let next = self.schedule.next_run(now, job.next_remaining);
            let state = if job.is_dependent() {
                JobState::BlockedOnParents
            } else {
                JobState::Armed
            };
            // The closure checks the flag under the write lock so a racing
            // disable is never overwritten.
            let armed = self.inner.cache.update(&self.job_id, |j| {
                if j.disabled {
                    return false;
                }
                j.state = state;
                j.next_run_at = next;
                true
            });
            match armed {
                Ok(true) => {}
                _ => break,
            }
            persist_job(&self.inner, &self.job_id).await;

            let clock = self.inner.clock.clone();
            let wait = async move {
                match next {
                    Some(at) => {
                        let dur = (at - clock.now()).to_std().unwrap_or_default();
                        tokio::time::sleep(dur).await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(wait);

            let fired = tokio::select! {
                _ = self.cancel.cancelled() => None,
                _ = &mut wait => Some(FireReason::Timer),
                reason = self.fire_rx.recv() => reason,
            };
            match fired {
                Some(reason) => {
                    fire_job(&self.inner, &self.job_id, &self.cancel, reason).await;
                }
                None => break,
            }
        }
        debug!(job_id = %self.job_id, "controller stopped");
    }
}

/// Run one full fire of `job_id`: the attempt sequence with retries, stat
/// bookkeeping, metadata updates, and dependent fan-out.
///
/// Also used directly for run-now requests against jobs that have no live
/// controller (disabled jobs keep the manual-start behavior).
pub(crate) async fn fire_job(
    inner: &Arc<SchedulerInner>,
    job_id: &str,
    cancel: &CancellationToken,
    reason: FireReason,
) {
    let Some(job) = inner.cache.get(job_id) else {
        return;
    };
    if job.disabled && !matches!(reason, FireReason::Manual) {
        return;
    }

    let now = inner.clock.now();
    debug!(job_id, ?reason, "fire");

    // Scheduled and manual fires consume one remaining count; parent-success
    // events do not touch the timer budget.
    let consumed_remaining = match reason {
        FireReason::ParentSuccess { .. } => job.next_remaining,
        _ => job.next_remaining.map(|n| n.saturating_sub(1)),
    };
    if inner
        .cache
        .update(job_id, |j| {
            j.state = JobState::Running;
            j.next_remaining = consumed_remaining;
            j.metadata.last_attempted_run = Some(now);
        })
        .is_err()
    {
        return;
    }

    let mut stat = JobStat::start(job_id, now);
    inner.cache.add_run(stat.clone());
    if let Err(e) = inner.store.save_run(&stat).await {
        error!(job_id, run_id = %stat.id, "failed to persist run: {e}");
    }

    let backoff = match job.epsilon_duration() {
        Ok(Some(eps)) => eps.sleep_duration(now),
        _ => inner.retry_delay,
    };

    let (success, output) = loop {
        let (ok, out) = run_one_attempt(inner, &job, cancel).await;
        if ok {
            break (true, out);
        }
        if cancel.is_cancelled() || stat.number_of_retries >= job.retries {
            break (false, out);
        }

        stat.number_of_retries += 1;
        let _ = inner.cache.update_run(stat.clone());
        if let Err(e) = inner.store.update_run(&stat).await {
            error!(job_id, run_id = %stat.id, "failed to persist retry: {e}");
        }

        let _ = inner.cache.update(job_id, |j| j.state = JobState::BackoffWait);
        let cancelled = tokio::select! {
            _ = tokio::time::sleep(backoff) => false,
            _ = cancel.cancelled() => true,
        };
        if cancelled {
            break (false, out);
        }
        let _ = inner.cache.update(job_id, |j| j.state = JobState::Running);
    };

    let finished_at = inner.clock.now();
    let status = if success {
        RunStatus::Success
    } else {
        RunStatus::Failed
    };
    stat.finish(status, finished_at, output);
    let _ = inner.cache.update_run(stat.clone());
    if let Err(e) = inner.store.update_run(&stat).await {
        error!(job_id, run_id = %stat.id, "failed to persist outcome: {e}");
    }

    let _ = inner.cache.update(job_id, |j| {
        if success {
            j.record_success(finished_at);
        } else {
            j.record_failure(finished_at);
        }
    });
    persist_job(inner, job_id).await;

    if success {
        fan_out_to_dependents(inner, job_id);
    }
}

/// One attempt on its own task; a panic inside it becomes a failed attempt
/// instead of taking the controller down.
async fn run_one_attempt(
    inner: &Arc<SchedulerInner>,
    job: &Job,
    cancel: &CancellationToken,
) -> (bool, String) {
    let executor = inner.executor.clone();
    let job_id = job.id.clone();
    let job = job.clone();
    let cancel = cancel.clone();
    let attempt = tokio::spawn(async move { executor.attempt(&job, &cancel).await });

    match attempt.await {
        Ok(outcome) => (outcome.success, outcome.output),
        Err(e) if e.is_panic() => {
            error!(job_id = %job_id, "attempt panicked");
            (false, "attempt panicked".to_string())
        }
        Err(_) => (false, "attempt aborted".to_string()),
    }
}

/// Queue a parent-success fire on every dependent with a live controller.
fn fan_out_to_dependents(inner: &Arc<SchedulerInner>, parent_id: &str) {
    let dependents = inner
        .cache
        .get(parent_id)
        .map(|j| j.dependent_jobs)
        .unwrap_or_default();
    if dependents.is_empty() {
        return;
    }

    let handles = inner.handles.read();
    for dep in dependents {
        match handles.get(&dep) {
            Some(handle) => {
                handle.fire(FireReason::ParentSuccess {
                    parent: parent_id.to_string(),
                });
            }
            None => {
                debug!(parent = parent_id, dependent = %dep, "dependent has no controller, skipping");
            }
        }
    }
}

async fn persist_job(inner: &Arc<SchedulerInner>, job_id: &str) {
    if let Some(job) = inner.cache.get(job_id) {
        if let Err(e) = inner.store.save_job(&job).await {
            error!(job_id, "failed to persist job: {e}");
        }
    }
}
