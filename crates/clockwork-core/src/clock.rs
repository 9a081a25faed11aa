//! Injectable time source.

use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Source of "now" for everything in the scheduler.
///
/// Production code uses [`SystemClock`]; tests use [`VirtualClock`] together
/// with tokio's paused time driver so wall time is fully deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that follows the tokio time driver.
///
/// Under `#[tokio::test(start_paused = true)]`, `tokio::time::advance`
/// moves this clock in lockstep with every pending sleep, which is what the
/// scenario tests rely on. Must be created and read inside a runtime.
pub struct VirtualClock {
    epoch: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl VirtualClock {
    /// Create a clock whose "now" starts at `epoch`.
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self {
            epoch,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.started.elapsed();
        self.epoch
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }
}
