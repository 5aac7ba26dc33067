//! Periodic index maintenance for Mnemo.
//!
//! A cron [`Scheduler`] runs registered [`SyncJob`]s on a background tokio
//! task and keeps a bounded [`JobHistory`] of their outcomes.

/// Jobs the scheduler can run.
pub mod job;
/// Cron scheduler and run history.
pub mod scheduler;

pub use job::{ReconcileJob, StatsJob, SyncJob};
pub use scheduler::{JobHistory, JobRun, ScheduledJob, Scheduler, HISTORY_CAPACITY};
