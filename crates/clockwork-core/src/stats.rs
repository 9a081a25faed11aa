//! Aggregate statistics over the registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::JobCache;

/// Point-in-time roll-up across every job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub jobs: usize,
    pub active_jobs: usize,
    pub disabled_jobs: usize,
    pub success_count: u64,
    pub error_count: u64,
    /// Earliest pending fire across active jobs.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Most recent fire across all jobs.
    pub last_attempted_run: Option<DateTime<Utc>>,
    /// When the service came up.
    pub created_at: DateTime<Utc>,
}

impl SchedulerStats {
    /// Compute the roll-up from a registry snapshot.
    pub fn roll_up(cache: &JobCache, created_at: DateTime<Utc>) -> Self {
        let jobs = cache.all();

        let mut stats = SchedulerStats {
            jobs: jobs.len(),
            active_jobs: 0,
            disabled_jobs: 0,
            success_count: 0,
            error_count: 0,
            next_run_at: None,
            last_attempted_run: None,
            created_at,
        };

        for job in jobs.values() {
            if job.disabled {
                stats.disabled_jobs += 1;
            } else {
                stats.active_jobs += 1;
                if let Some(at) = job.next_run_at {
                    stats.next_run_at = Some(match stats.next_run_at {
                        Some(cur) if cur <= at => cur,
                        _ => at,
                    });
                }
            }
            stats.success_count += job.metadata.success_count;
            stats.error_count += job.metadata.error_count;
            if let Some(at) = job.metadata.last_attempted_run {
                stats.last_attempted_run = Some(match stats.last_attempted_run {
                    Some(cur) if cur >= at => cur,
                    _ => at,
                });
            }
        }

        stats
    }
}
