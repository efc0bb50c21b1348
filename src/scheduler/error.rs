use crate::error::AppError;
use crate::scheduler::job::JobId;

pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The cron expression could not be parsed
    #[error("invalid schedule '{schedule}': {reason}")]
    InvalidSchedule { schedule: String, reason: String },

    #[error("no job registered with id {0}")]
    UnknownJob(JobId),

    /// Failure inside tokio-cron-scheduler
    #[error("cron scheduler: {0}")]
    Cron(String),
}

impl From<tokio_cron_scheduler::JobSchedulerError> for SchedulerError {
    fn from(err: tokio_cron_scheduler::JobSchedulerError) -> Self {
        SchedulerError::Cron(err.to_string())
    }
}

impl From<SchedulerError> for AppError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::UnknownJob(id) => AppError::NotFound(format!("job {}", id)),
            SchedulerError::InvalidSchedule { .. } => AppError::Configuration(err.to_string()),
            SchedulerError::Cron(msg) => AppError::Internal(msg),
        }
    }
}
