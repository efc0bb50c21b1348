use super::{
    config::SchedulerConfig,
    error::{SchedulerError, SchedulerResult},
    job::{Job, JobId, JobState, JobStats},
    metrics::SCHEDULER_METRICS,
};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_cron_scheduler::JobScheduler;
use tracing::{info, warn};
use uuid::Uuid;

const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

struct Registration {
    job: Arc<Job>,
    cron_id: Uuid,
}

/// Triggers registered jobs on their cron schedules
pub struct SchedulerService {
    config: SchedulerConfig,
    cron: JobScheduler,
    jobs: DashMap<JobId, Registration>,
    running: bool,
}

impl SchedulerService {
    pub async fn new(config: SchedulerConfig) -> SchedulerResult<Self> {
        let cron = JobScheduler::new().await?;
        Ok(Self {
            config,
            cron,
            jobs: DashMap::new(),
            running: false,
        })
    }

    /// Start triggering; a disabled scheduler accepts jobs but never runs them
    pub async fn start(&mut self) -> SchedulerResult<()> {
        if !self.config.enabled {
            info!("Scheduler disabled; jobs will not be triggered");
            return Ok(());
        }
        if self.running {
            return Ok(());
        }

        self.cron.start().await?;
        self.running = true;
        info!(jobs = self.jobs.len(), "Scheduler started");
        Ok(())
    }

    /// Stop triggering, then give a running job the grace period to finish
    pub async fn shutdown(&mut self) -> SchedulerResult<()> {
        if !self.running {
            return Ok(());
        }

        self.cron.shutdown().await?;
        self.running = false;

        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        let settled = tokio::time::timeout(grace, async {
            while self.jobs.iter().any(|entry| entry.job.is_running()) {
                tokio::time::sleep(SHUTDOWN_POLL).await;
            }
        })
        .await;

        if settled.is_err() {
            warn!(
                grace_secs = self.config.shutdown_grace_secs,
                "Job still running when the shutdown grace period ended"
            );
        }

        info!("Scheduler stopped");
        Ok(())
    }

    pub async fn add_job(&self, job: Job) -> SchedulerResult<JobId> {
        let job = Arc::new(job);
        let schedule = job.schedule();

        let trigger = Arc::clone(&job);
        let cron_job =
            tokio_cron_scheduler::Job::new_async(schedule.as_str(), move |_uuid, _scheduler| {
                let job = Arc::clone(&trigger);
                Box::pin(async move {
                    let _ = job.run_once().await;
                })
            })
            .map_err(|e| SchedulerError::InvalidSchedule {
                schedule: schedule.clone(),
                reason: e.to_string(),
            })?;

        let cron_id = self.cron.add(cron_job).await?;
        let id = job.id();
        info!(job = job.name(), job_id = %id, schedule = %schedule, "Job scheduled");

        self.jobs.insert(id, Registration { job, cron_id });
        SCHEDULER_METRICS.jobs_registered.set(self.jobs.len() as i64);
        Ok(id)
    }

    /// Unschedule a job; a run already in progress finishes on its own
    pub async fn remove_job(&self, id: &JobId) -> SchedulerResult<()> {
        let (_, registration) = self
            .jobs
            .remove(id)
            .ok_or(SchedulerError::UnknownJob(*id))?;

        self.cron.remove(&registration.cron_id).await?;
        registration.job.mark_removed();
        SCHEDULER_METRICS.jobs_registered.set(self.jobs.len() as i64);

        info!(job = registration.job.name(), job_id = %id, "Job removed");
        Ok(())
    }

    pub fn job_stats(&self, id: &JobId) -> SchedulerResult<JobStats> {
        self.jobs
            .get(id)
            .map(|entry| entry.job.stats())
            .ok_or(SchedulerError::UnknownJob(*id))
    }

    pub fn list_jobs(&self) -> Vec<JobStats> {
        self.jobs.iter().map(|entry| entry.job.stats()).collect()
    }

    /// Totals over every registered job
    pub fn get_stats(&self) -> SchedulerStats {
        self.list_jobs()
            .iter()
            .fold(SchedulerStats::default(), |mut totals, job| {
                totals.jobs += 1;
                if job.state == JobState::Running {
                    totals.running += 1;
                }
                totals.runs += job.runs;
                totals.completed += job.completed;
                totals.skipped += job.skipped;
                totals.failed += job.failed;
                totals
            })
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub jobs: usize,
    pub running: usize,
    pub runs: u64,
    pub completed: u64,
    pub skipped: u64,
    pub failed: u64,
}
