use crate::job::SyncJob;
use chrono::{DateTime, Utc};
use cron::Schedule;
use mnemo_core::{MnemoError, MnemoResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;

/// Runs kept in [`JobHistory`].
pub const HISTORY_CAPACITY: usize = 100;

/// Jobs due within this many milliseconds of the wake-up are fired together.
const FIRE_TOLERANCE_MS: i64 = 500;

/// A job bound to its cron schedule.
#[derive(Clone)]
pub struct ScheduledJob {
    /// Unique job name, used by [`Scheduler::run_now`] and the history.
    pub name: String,
    /// Seven-field cron expression (seconds first, year last).
    pub cron_expression: String,
    /// Disabled jobs are never fired by the loop.
    pub enabled: bool,
    /// The work to run.
    pub job: Arc<dyn SyncJob>,
}

impl ScheduledJob {
    /// An enabled job.
    pub fn new(
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        job: Arc<dyn SyncJob>,
    ) -> Self {
        Self {
            name: name.into(),
            cron_expression: cron_expression.into(),
            enabled: true,
            job,
        }
    }

    /// Enables or disables the job.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

impl std::fmt::Debug for ScheduledJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledJob")
            .field("name", &self.name)
            .field("cron_expression", &self.cron_expression)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Outcome of one job execution.
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    /// Name of the job that ran.
    pub job: String,
    /// When the run began.
    pub started_at: DateTime<Utc>,
    /// When the run ended.
    pub finished_at: DateTime<Utc>,
    /// Whether the job returned `Ok`.
    pub ok: bool,
    /// Job summary on success, error message on failure.
    pub summary: String,
}

/// Bounded, shared log of recent [`JobRun`]s, oldest first.
#[derive(Debug, Clone, Default)]
pub struct JobHistory {
    runs: Arc<Mutex<VecDeque<JobRun>>>,
}

impl JobHistory {
    fn record(&self, run: JobRun) {
        let mut runs = self.runs.lock();
        if runs.len() == HISTORY_CAPACITY {
            runs.pop_front();
        }
        runs.push_back(run);
    }

    /// Every retained run, oldest first.
    pub fn runs(&self) -> Vec<JobRun> {
        self.runs.lock().iter().cloned().collect()
    }

    /// Most recent run of `job`.
    pub fn last_run(&self, job: &str) -> Option<JobRun> {
        self.runs.lock().iter().rev().find(|r| r.job == job).cloned()
    }

    /// Number of retained runs.
    pub fn len(&self) -> usize {
        self.runs.lock().len()
    }

    /// Whether nothing has run yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cron-based scheduler that runs a collection of [`ScheduledJob`]s.
///
/// Jobs fire one at a time on the scheduler's own task, so a slow run delays
/// later ones instead of overlapping with itself. Fire times missed while a
/// job was running are skipped, not replayed.
#[derive(Debug)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
    history: JobHistory,
}

impl Scheduler {
    /// Create a new scheduler with the given jobs.
    pub fn new(jobs: Vec<ScheduledJob>) -> Self {
        Self {
            jobs,
            history: JobHistory::default(),
        }
    }

    /// Registers another job.
    pub fn add(&mut self, job: ScheduledJob) {
        self.jobs.push(job);
    }

    /// Parse a cron expression string into a [`cron::Schedule`].
    ///
    /// Uses the 7-field cron format: sec min hour day-of-month month day-of-week year.
    pub fn parse_cron(cron_expr: &str) -> MnemoResult<Schedule> {
        Schedule::from_str(cron_expr)
            .map_err(|e| MnemoError::Config(format!("Invalid cron expression '{cron_expr}': {e}")))
    }

    /// Compute the next fire time for a given cron expression.
    pub fn next_fire_time(cron_expr: &str) -> MnemoResult<DateTime<Utc>> {
        let schedule = Self::parse_cron(cron_expr)?;
        schedule.upcoming(Utc).next().ok_or_else(|| {
            MnemoError::Config(format!(
                "Cron expression '{cron_expr}' has no upcoming fire times"
            ))
        })
    }

    /// Return references to only the enabled jobs.
    pub fn enabled_jobs(&self) -> Vec<&ScheduledJob> {
        self.jobs.iter().filter(|j| j.enabled).collect()
    }

    /// Return the total number of jobs (enabled and disabled).
    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Handle on the run history; stays valid after [`start`](Self::start).
    pub fn history(&self) -> JobHistory {
        self.history.clone()
    }

    /// Runs the named job immediately, whether or not it is enabled.
    pub async fn run_now(&self, name: &str) -> MnemoResult<JobRun> {
        let job = self
            .jobs
            .iter()
            .find(|j| j.name == name)
            .ok_or_else(|| MnemoError::Config(format!("Unknown job '{name}'")))?;
        Ok(execute(job, &self.history).await)
    }

    /// Start the scheduler background loop.
    ///
    /// Spawns a tokio task that sleeps until the nearest fire time, runs
    /// every job that is due, and repeats. Jobs with invalid cron
    /// expressions are skipped with a warning.
    ///
    /// Returns the [`tokio::task::JoinHandle`] so the caller can abort or await it.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut timetable: Vec<(ScheduledJob, Schedule, DateTime<Utc>)> = Vec::new();
            for job in self.jobs.iter().filter(|j| j.enabled) {
                let schedule = match Self::parse_cron(&job.cron_expression) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(job = %job.name, error = %e, "Scheduler: skipping job");
                        continue;
                    }
                };
                match schedule.upcoming(Utc).next() {
                    Some(next) => timetable.push((job.clone(), schedule, next)),
                    None => {
                        tracing::warn!(job = %job.name, "Scheduler: job has no upcoming fire times");
                    }
                }
            }

            if timetable.is_empty() {
                tracing::info!("Scheduler: no runnable jobs, exiting");
                return;
            }
            tracing::info!(jobs = timetable.len(), "Scheduler started");

            loop {
                let Some(nearest) = timetable.iter().map(|(_, _, next)| *next).min() else {
                    return;
                };

                let now = Utc::now();
                if nearest > now {
                    let wait = (nearest - now).to_std().unwrap_or_default();
                    tracing::debug!(?wait, "Scheduler: sleeping until next job");
                    tokio::time::sleep(wait).await;
                }

                let fire_threshold =
                    Utc::now() + chrono::Duration::milliseconds(FIRE_TOLERANCE_MS);
                let mut finished = Vec::new();
                for (job, schedule, next) in &mut timetable {
                    if *next > fire_threshold {
                        continue;
                    }
                    let fired_for = *next;
                    execute(job, &self.history).await;
                    let after = fired_for.max(Utc::now());
                    match schedule.after(&after).next() {
                        Some(following) => *next = following,
                        None => finished.push(job.name.clone()),
                    }
                }
                if !finished.is_empty() {
                    timetable.retain(|(job, _, _)| !finished.contains(&job.name));
                    if timetable.is_empty() {
                        tracing::info!("Scheduler: schedule exhausted, exiting");
                        return;
                    }
                }
            }
        })
    }
}

async fn execute(job: &ScheduledJob, history: &JobHistory) -> JobRun {
    let started_at = Utc::now();
    tracing::info!(job = %job.name, "Scheduler: firing job");
    let (ok, summary) = match job.job.run().await {
        Ok(summary) => (true, summary),
        Err(e) => {
            tracing::warn!(job = %job.name, error = %e, "Scheduler: job failed");
            (false, e.to_string())
        }
    };
    let run = JobRun {
        job: job.name.clone(),
        started_at,
        finished_at: Utc::now(),
        ok,
        summary,
    };
    if ok {
        tracing::info!(job = %run.job, summary = %run.summary, "Scheduler: job finished");
    }
    history.record(run.clone());
    run
}
