//! Periodic job runner.
//!
//! One tokio task per job, each on its own interval. Every run is spawned
//! separately so a panic surfaces as a join error and is logged and counted;
//! neither the job's loop nor its siblings stop. A run in flight when
//! shutdown fires is allowed to finish.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::ReconciliationJob;
use crate::error::LifecycleResult;
use crate::lifecycle::RunReport;

/// Per-job runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub runs: u64,
    pub failures: u64,
    pub panics: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_report: Option<RunReport>,
}

type StatsTable = Arc<Mutex<HashMap<&'static str, JobStats>>>;

fn lock(stats: &StatsTable) -> MutexGuard<'_, HashMap<&'static str, JobStats>> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Scheduler {
    jobs: Vec<Arc<dyn ReconciliationJob>>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self {
            jobs: Vec::new(),
            shutdown,
        }
    }

    pub fn with_job(mut self, job: Arc<dyn ReconciliationJob>) -> Self {
        self.jobs.push(job);
        self
    }

    pub fn with_jobs(mut self, jobs: impl IntoIterator<Item = Arc<dyn ReconciliationJob>>) -> Self {
        self.jobs.extend(jobs);
        self
    }

    /// Spawn every job loop on the current runtime.
    pub fn start(self) -> SchedulerHandle {
        let stats: StatsTable = Arc::new(Mutex::new(
            self.jobs
                .iter()
                .map(|job| (job.name(), JobStats::default()))
                .collect(),
        ));

        let tasks = self
            .jobs
            .into_iter()
            .map(|job| {
                info!(job = job.name(), interval_secs = job.interval().as_secs(), "job scheduled");
                tokio::spawn(job_loop(job, self.shutdown.clone(), stats.clone()))
            })
            .collect();

        SchedulerHandle {
            shutdown: self.shutdown,
            tasks,
            stats,
        }
    }
}

/// Handle to stop the scheduler and read its statistics.
pub struct SchedulerHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    stats: StatsTable,
}

impl SchedulerHandle {
    /// Fire the shared cancellation token and wait for every job loop to exit.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "job loop ended abnormally");
            }
        }
        info!("scheduler stopped");
    }

    pub fn stats(&self) -> HashMap<&'static str, JobStats> {
        lock(&self.stats).clone()
    }

    pub fn job_stats(&self, name: &str) -> Option<JobStats> {
        lock(&self.stats).get(name).cloned()
    }
}

async fn job_loop(job: Arc<dyn ReconciliationJob>, shutdown: CancellationToken, stats: StatsTable) {
    let name = job.name();
    let mut ticker = tokio::time::interval(job.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let run = tokio::spawn({
            let job = job.clone();
            async move { job.run_once().await }
        });
        record(&stats, name, run.await);
    }
    debug!(job = name, "job loop stopped");
}

fn record(
    stats: &StatsTable,
    name: &'static str,
    outcome: Result<LifecycleResult<RunReport>, JoinError>,
) {
    let mut table = lock(stats);
    let entry = table.entry(name).or_default();
    entry.runs += 1;

    match outcome {
        Ok(Ok(report)) => {
            entry.last_success = Some(Utc::now());
            entry.last_report = Some(report);
            if report.unnotified > 0 {
                warn!(job = name, unnotified = report.unnotified, "some customers were not notified");
            }
            if !report.is_idle() {
                debug!(job = name, processed = report.processed, skipped = report.skipped, "job run finished");
            }
        }
        Ok(Err(e)) => {
            entry.failures += 1;
            error!(job = name, error = %e, "job run failed");
        }
        Err(e) if e.is_panic() => {
            entry.panics += 1;
            let message = panic_message(e);
            error!(job = name, panic = %message, "job run panicked");
        }
        Err(e) => {
            entry.failures += 1;
            error!(job = name, error = %e, "job run cancelled");
        }
    }
}

fn panic_message(err: JoinError) -> String {
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
