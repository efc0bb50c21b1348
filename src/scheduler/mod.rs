//! Cron-driven drain scheduling
//!
//! [`SchedulerService`] triggers [`ScheduledTask`]s through
//! `tokio-cron-scheduler` and keeps per-job run statistics. The relay
//! registers one job, [`drain_job`], which drains the notification queue on
//! a fixed cadence.
//!
//! # Example
//!
//! ```no_run
//! use notification_relay::scheduler::{drain_job, SchedulerConfig, SchedulerService};
//! # use notification_relay::notifications::Drainer;
//! # use std::sync::Arc;
//!
//! # async fn run(drainer: Arc<Drainer>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut scheduler = SchedulerService::new(SchedulerConfig::default()).await?;
//! scheduler.add_job(drain_job(drainer, "*/5 * * * * *")).await?;
//! scheduler.start().await?;
//!
//! tokio::signal::ctrl_c().await?;
//! scheduler.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod drain;
mod error;
mod job;
mod metrics;
mod service;

pub use config::SchedulerConfig;
pub use drain::{drain_job, DrainTask, DRAIN_JOB_NAME};
pub use error::{SchedulerError, SchedulerResult};
pub use job::{Job, JobId, JobState, JobStats, ScheduledTask, TaskRun};
pub use metrics::{init_scheduler_metrics, SCHEDULER_METRICS};
pub use service::{SchedulerService, SchedulerStats};
