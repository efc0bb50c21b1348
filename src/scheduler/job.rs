//! Recurring jobs and their run statistics

use super::metrics::SCHEDULER_METRICS;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};
use uuid::Uuid;

pub type JobId = Uuid;

/// What a single run of a task amounted to
#[derive(Debug, Clone, PartialEq)]
pub enum TaskRun {
    /// The task did its work; the value is kept as the job's last result
    Completed(serde_json::Value),
    /// The task decided there was nothing it could do this time
    Skipped,
}

/// Work the scheduler triggers on a cron cadence
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<TaskRun, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for its next trigger
    Waiting,
    Running,
    /// Taken off the scheduler; it will not be triggered again
    Removed,
}

/// Run statistics of one job
#[derive(Debug, Clone, Serialize)]
pub struct JobStats {
    pub id: JobId,
    pub name: String,
    pub schedule: String,
    pub state: JobState,
    pub runs: u64,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Failed runs since the last run that did not fail
    pub consecutive_failures: u64,
    pub last_started: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub last_error: Option<String>,
    /// Value of the last completed run
    pub last_result: serde_json::Value,
}

impl JobStats {
    fn new(name: &str, schedule: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            schedule: schedule.to_string(),
            state: JobState::Waiting,
            runs: 0,
            completed: 0,
            skipped: 0,
            failed: 0,
            consecutive_failures: 0,
            last_started: None,
            last_duration_ms: None,
            last_error: None,
            last_result: serde_json::Value::Null,
        }
    }

    fn record(&mut self, outcome: &Result<TaskRun, String>, duration_ms: u64) {
        self.runs += 1;
        self.last_duration_ms = Some(duration_ms);

        match outcome {
            Ok(TaskRun::Completed(value)) => {
                self.completed += 1;
                self.consecutive_failures = 0;
                self.last_result = value.clone();
            }
            Ok(TaskRun::Skipped) => {
                self.skipped += 1;
                self.consecutive_failures = 0;
            }
            Err(e) => {
                self.failed += 1;
                self.consecutive_failures += 1;
                self.last_error = Some(e.clone());
            }
        }
    }
}

struct Tracking {
    stats: JobStats,
    /// Runs in progress; overlapping triggers may each hold one
    active: usize,
    removed: bool,
}

impl Tracking {
    fn snapshot(&self) -> JobStats {
        let mut stats = self.stats.clone();
        stats.state = if self.removed {
            JobState::Removed
        } else if self.active > 0 {
            JobState::Running
        } else {
            JobState::Waiting
        };
        stats
    }
}

/// A task bound to a cron schedule
pub struct Job {
    task: Arc<dyn ScheduledTask>,
    tracking: Mutex<Tracking>,
}

impl Job {
    pub fn new(task: Arc<dyn ScheduledTask>, schedule: impl Into<String>) -> Self {
        let stats = JobStats::new(task.name(), &schedule.into());
        Self {
            task,
            tracking: Mutex::new(Tracking {
                stats,
                active: 0,
                removed: false,
            }),
        }
    }

    pub fn id(&self) -> JobId {
        self.tracking.lock().stats.id
    }

    pub fn name(&self) -> &str {
        self.task.name()
    }

    pub fn schedule(&self) -> String {
        self.tracking.lock().stats.schedule.clone()
    }

    pub fn stats(&self) -> JobStats {
        self.tracking.lock().snapshot()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.tracking.lock().active > 0
    }

    pub(crate) fn mark_removed(&self) {
        self.tracking.lock().removed = true;
    }

    /// Run the task once, outside the cron cadence as well
    pub async fn run_once(&self) -> Result<TaskRun, String> {
        {
            let mut tracking = self.tracking.lock();
            tracking.active += 1;
            tracking.stats.last_started = Some(Utc::now());
        }

        let start = Instant::now();
        let outcome = self.task.run().await;
        let elapsed = start.elapsed();

        let label = match &outcome {
            Ok(TaskRun::Completed(_)) => "completed",
            Ok(TaskRun::Skipped) => "skipped",
            Err(_) => "failed",
        };
        SCHEDULER_METRICS.record_run(self.name(), label, elapsed.as_secs_f64());

        {
            let mut tracking = self.tracking.lock();
            tracking.active -= 1;
            tracking.stats.record(&outcome, elapsed.as_millis() as u64);
        }

        match &outcome {
            Err(e) => error!(job = self.name(), error = %e, "Scheduled job failed"),
            Ok(_) => debug!(
                job = self.name(),
                result = label,
                duration_ms = elapsed.as_millis() as u64,
                "Scheduled job finished"
            ),
        }

        outcome
    }
}
