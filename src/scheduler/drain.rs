//! The recurring queue drain

use super::job::{Job, ScheduledTask, TaskRun};
use crate::notifications::{DrainError, Drainer};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub const DRAIN_JOB_NAME: &str = "drain_notification_queue";

/// Runs one [`Drainer::drain`] per trigger
///
/// A trigger that finds the previous drain still running is skipped, not
/// failed. A drain that could not start or lost its session fails the run.
pub struct DrainTask {
    drainer: Arc<Drainer>,
}

impl DrainTask {
    pub fn new(drainer: Arc<Drainer>) -> Self {
        Self { drainer }
    }
}

#[async_trait]
impl ScheduledTask for DrainTask {
    fn name(&self) -> &str {
        DRAIN_JOB_NAME
    }

    async fn run(&self) -> Result<TaskRun, String> {
        match self.drainer.drain().await {
            Ok(report) => serde_json::to_value(&report)
                .map(TaskRun::Completed)
                .map_err(|e| e.to_string()),
            Err(DrainError::ConcurrentDrainConflict) => {
                debug!(
                    queue = self.drainer.queue_name(),
                    "Previous drain still running, skipping this one"
                );
                Ok(TaskRun::Skipped)
            }
            Err(DrainError::Interrupted { source, report }) => Err(format!(
                "drain interrupted after {} message(s), {} left queued: {}",
                report.received,
                report.left_pending(),
                source
            )),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Drain job on the given cron schedule (default `*/5 * * * * *`)
pub fn drain_job(drainer: Arc<Drainer>, schedule: impl Into<String>) -> Job {
    Job::new(Arc::new(DrainTask::new(drainer)), schedule)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::InMemoryQueueClient;
    use crate::models::NotificationMessage;
    use crate::notifications::{DeliveryError, DirectTransport, DrainerConfig};

    struct Accepting;

    #[async_trait]
    impl DirectTransport for Accepting {
        fn name(&self) -> &'static str {
            "accepting"
        }

        async fn send(&self, _message: &NotificationMessage) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn drainer(broker: &InMemoryQueueClient) -> Arc<Drainer> {
        Arc::new(Drainer::new(
            Arc::new(broker.clone()),
            Arc::new(Accepting),
            "email_queue",
            DrainerConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_completed_drain_keeps_report() {
        let broker = InMemoryQueueClient::new();
        let job = drain_job(drainer(&broker), "*/5 * * * * *");

        let run = job.run_once().await.unwrap();
        assert!(matches!(run, TaskRun::Completed(_)));

        let stats = job.stats();
        assert_eq!(stats.name, DRAIN_JOB_NAME);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.last_result["queue"], "email_queue");
        assert_eq!(stats.last_result["received"], 0);
    }

    #[tokio::test]
    async fn test_unreachable_broker_fails_run() {
        let broker = InMemoryQueueClient::new();
        broker.set_available(false);
        let job = drain_job(drainer(&broker), "*/5 * * * * *");

        assert!(job.run_once().await.is_err());
        let stats = job.stats();
        assert_eq!(stats.failed, 1);
        assert!(stats.last_error.is_some());
    }
}
