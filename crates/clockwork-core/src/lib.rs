//! # Clockwork Core
//!
//! The scheduler core: job registry, schedule parsing, templating,
//! execution, per-job controllers, persistence interface, and the
//! scheduler facade that ties them together.
//!
//! ```text
//! ┌────────────┐   mutations   ┌───────────┐   arms/cancels   ┌─────────────┐
//! │ control    │ ─────────────▶│ Scheduler │ ────────────────▶│ controllers │
//! │ plane      │               │  + cache  │                  │ (1 per job) │
//! └────────────┘               └─────┬─────┘                  └──────┬──────┘
//!                                    │ writes                        │ attempts
//!                                    ▼                               ▼
//!                              ┌───────────┐                  ┌─────────────┐
//!                              │ JobStore  │◀─────────────────│  Executor   │
//!                              └───────────┘     JobStats     └─────────────┘
//! ```

pub mod cache;
pub mod clock;
pub mod controller;
pub mod error;
pub mod executor;
pub mod job;
pub mod schedule;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod template;

pub use cache::JobCache;
pub use clock::{Clock, SharedClock, SystemClock, VirtualClock};
pub use error::Error;
pub use executor::{AttemptOutcome, Executor, MAX_OUTPUT_BYTES};
pub use job::{Job, JobStat, JobState, JobType, Metadata, RemoteProperties, RunStatus};
pub use schedule::{IsoDuration, Schedule};
pub use scheduler::{Scheduler, SchedulerOptions};
pub use stats::SchedulerStats;
pub use store::{JobStore, MemoryStore};
