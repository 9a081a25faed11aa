//! Concurrent in-memory registry of jobs and execution records.

use std::collections::{HashMap, HashSet};

use parking_lot::{RwLock, RwLockReadGuard};
use tracing::debug;

use crate::error::Error;
use crate::job::{Job, JobStat};

#[derive(Default)]
struct RunTable {
    by_id: HashMap<String, JobStat>,
    /// Run ids per job, in `ran_at` append order.
    by_job: HashMap<String, Vec<String>>,
}

/// The registry: `job-id → Job` and `run-id → JobStat`, guarded by
/// reader-writer locks.
///
/// Validation (uniqueness, parent resolution, cycle detection) happens
/// before the write lock is taken, so mutations hold it for O(1)-ish work.
pub struct JobCache {
    jobs: RwLock<HashMap<String, Job>>,
    runs: RwLock<RunTable>,
}

impl JobCache {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            runs: RwLock::new(RunTable::default()),
        }
    }

    /// Snapshot of every job, bound to the read lock.
    ///
    /// The guard must not be held across an await point or retained past
    /// the consumer's iteration; serialization happens under it.
    pub fn all(&self) -> RwLockReadGuard<'_, HashMap<String, Job>> {
        self.jobs.read()
    }

    /// Fetch a job by id.
    pub fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Install a new job. Fails if the id is taken, a parent is missing, or
    /// the dependency relation would gain a cycle.
    pub fn insert(&self, job: Job) -> Result<(), Error> {
        job.validate()?;
        {
            let jobs = self.jobs.read();
            if jobs.contains_key(&job.id) {
                return Err(Error::InvalidJob(format!("job id {} already exists", job.id)));
            }
            Self::check_edges(&jobs, &job)?;
        }

        let mut jobs = self.jobs.write();
        // Re-check under the write lock; a racing insert may have landed.
        if jobs.contains_key(&job.id) {
            return Err(Error::InvalidJob(format!("job id {} already exists", job.id)));
        }
        Self::check_edges(&jobs, &job)?;
        Self::attach_parents(&mut jobs, &job);
        debug!(job_id = %job.id, name = %job.name, "job installed");
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Replace an existing job in place, fixing up dependent edges for any
    /// parent change.
    pub fn replace(&self, job: Job) -> Result<(), Error> {
        job.validate()?;
        {
            let jobs = self.jobs.read();
            if !jobs.contains_key(&job.id) {
                return Err(Error::UnknownJob(job.id.clone()));
            }
            Self::check_edges(&jobs, &job)?;
        }

        let mut jobs = self.jobs.write();
        let old = jobs
            .remove(&job.id)
            .ok_or_else(|| Error::UnknownJob(job.id.clone()))?;
        if let Err(e) = Self::check_edges(&jobs, &job) {
            jobs.insert(old.id.clone(), old);
            return Err(e);
        }
        Self::detach_parents(&mut jobs, &old);
        Self::attach_parents(&mut jobs, &job);
        // Dependents of the old record survive a replace.
        let mut job = job;
        job.dependent_jobs = old.dependent_jobs;
        debug!(job_id = %job.id, "job replaced");
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Apply `f` to the stored job under the write lock.
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut Job) -> R) -> Result<R, Error> {
        let mut jobs = self.jobs.write();
        let job = jobs.get_mut(id).ok_or_else(|| Error::UnknownJob(id.to_string()))?;
        Ok(f(job))
    }

    /// Remove a job, detaching it from every parent's dependent list and
    /// dropping its cached runs. Returns the removed record.
    pub fn delete(&self, id: &str) -> Result<Job, Error> {
        let removed = {
            let mut jobs = self.jobs.write();
            let removed = jobs
                .remove(id)
                .ok_or_else(|| Error::UnknownJob(id.to_string()))?;
            Self::detach_parents(&mut jobs, &removed);
            removed
        };

        let mut runs = self.runs.write();
        if let Some(ids) = runs.by_job.remove(id) {
            for run_id in ids {
                runs.by_id.remove(&run_id);
            }
        }
        debug!(job_id = %id, "job deleted");
        Ok(removed)
    }

    /// Load a recovered job without edge validation; startup reconciliation
    /// rebuilds dependent edges afterwards via [`rebuild_dependents`].
    ///
    /// [`rebuild_dependents`]: JobCache::rebuild_dependents
    pub fn install_recovered(&self, job: Job) {
        self.jobs.write().insert(job.id.clone(), job);
    }

    /// Recompute every `dependent_jobs` list from the `parent_jobs` edges.
    pub fn rebuild_dependents(&self) {
        let mut jobs = self.jobs.write();
        let edges: Vec<(String, String)> = jobs
            .values()
            .flat_map(|j| {
                j.parent_jobs
                    .iter()
                    .map(|p| (p.clone(), j.id.clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        for job in jobs.values_mut() {
            job.dependent_jobs.clear();
        }
        for (parent, child) in edges {
            if let Some(p) = jobs.get_mut(&parent) {
                if !p.dependent_jobs.contains(&child) {
                    p.dependent_jobs.push(child);
                }
            }
        }
    }

    // Runs ------------------------------------------------------------------

    /// Record a newly started run.
    pub fn add_run(&self, stat: JobStat) {
        let mut runs = self.runs.write();
        runs.by_job
            .entry(stat.job_id.clone())
            .or_default()
            .push(stat.id.clone());
        runs.by_id.insert(stat.id.clone(), stat);
    }

    /// Overwrite an existing run record.
    pub fn update_run(&self, stat: JobStat) -> Result<(), Error> {
        let mut runs = self.runs.write();
        if !runs.by_id.contains_key(&stat.id) {
            return Err(Error::UnknownRun(stat.id.clone()));
        }
        runs.by_id.insert(stat.id.clone(), stat);
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> Option<JobStat> {
        self.runs.read().by_id.get(id).cloned()
    }

    /// Runs for a job in `ran_at` append order.
    pub fn runs_for(&self, job_id: &str) -> Vec<JobStat> {
        let runs = self.runs.read();
        runs.by_job
            .get(job_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| runs.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    // Edge helpers ----------------------------------------------------------

    /// Parents must resolve, and walking `parent_jobs` edges from the new
    /// job must never reach the job itself.
    fn check_edges(jobs: &HashMap<String, Job>, job: &Job) -> Result<(), Error> {
        for parent in &job.parent_jobs {
            if parent == &job.id {
                return Err(Error::CycleDetected(job.id.clone()));
            }
            if !jobs.contains_key(parent) {
                return Err(Error::UnknownJob(parent.clone()));
            }
        }

        let mut seen: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&str> = job.parent_jobs.iter().map(String::as_str).collect();
        while let Some(current) = stack.pop() {
            if current == job.id {
                return Err(Error::CycleDetected(job.id.clone()));
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(parent) = jobs.get(current) {
                stack.extend(parent.parent_jobs.iter().map(String::as_str));
            }
        }
        Ok(())
    }

    fn attach_parents(jobs: &mut HashMap<String, Job>, job: &Job) {
        for parent in &job.parent_jobs {
            if let Some(p) = jobs.get_mut(parent) {
                if !p.dependent_jobs.contains(&job.id) {
                    p.dependent_jobs.push(job.id.clone());
                }
            }
        }
    }

    fn detach_parents(jobs: &mut HashMap<String, Job>, job: &Job) {
        for parent in &job.parent_jobs {
            if let Some(p) = jobs.get_mut(parent) {
                p.dependent_jobs.retain(|d| d != &job.id);
            }
        }
    }
}

impl Default for JobCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "cache_tests.rs"]
mod tests;
