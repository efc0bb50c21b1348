//! Prometheus metrics for scheduled jobs

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};

pub struct SchedulerMetrics {
    /// Job runs by result (completed, skipped, failed)
    pub job_runs: IntCounterVec,

    pub job_duration: HistogramVec,

    /// Jobs currently registered with the cron runner
    pub jobs_registered: IntGauge,
}

lazy_static! {
    pub static ref SCHEDULER_METRICS: SchedulerMetrics = SchedulerMetrics {
        job_runs: register_int_counter_vec!(
            "relay_job_runs_total",
            "Scheduled job runs by result",
            &["job", "result"]
        )
        .unwrap(),

        job_duration: register_histogram_vec!(
            "relay_job_duration_seconds",
            "Scheduled job run duration in seconds",
            &["job"],
            vec![0.01, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
        )
        .unwrap(),

        jobs_registered: register_int_gauge!(
            "relay_jobs_registered",
            "Jobs registered with the scheduler"
        )
        .unwrap(),
    };
}

/// Register scheduler metrics (idempotent)
pub fn init_scheduler_metrics() {
    lazy_static::initialize(&SCHEDULER_METRICS);
}

impl SchedulerMetrics {
    pub(crate) fn record_run(&self, job: &str, result: &str, duration_secs: f64) {
        self.job_runs.with_label_values(&[job, result]).inc();
        self.job_duration
            .with_label_values(&[job])
            .observe(duration_secs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_counted_by_result() {
        init_scheduler_metrics();
        let before = SCHEDULER_METRICS
            .job_runs
            .with_label_values(&["metrics_test_job", "skipped"])
            .get();

        SCHEDULER_METRICS.record_run("metrics_test_job", "skipped", 0.001);

        let after = SCHEDULER_METRICS
            .job_runs
            .with_label_values(&["metrics_test_job", "skipped"])
            .get();
        assert_eq!(after, before + 1);
    }
}
