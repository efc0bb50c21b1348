//! Prometheus metrics for queueing and delivery

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, GaugeVec,
    HistogramVec,
};

/// Messaging metrics
pub struct MessagingMetrics {
    /// Messages published counter
    pub messages_published: CounterVec,

    /// Message publish failures
    pub publish_failures: CounterVec,

    /// Message publish latency
    pub publish_latency: HistogramVec,

    /// Message size histogram
    pub message_size: HistogramVec,

    /// Drained messages by outcome (delivered, failed, poisoned, dead_lettered, rejected, ack_failed)
    pub deliveries: CounterVec,

    /// Direct transport send latency
    pub delivery_latency: HistogramVec,

    /// Drain invocations by result (completed, failed, skipped)
    pub drain_runs: CounterVec,

    /// Messages left pending after the last drain
    pub pending_after_drain: GaugeVec,
}

lazy_static! {
    pub static ref MESSAGING_METRICS: MessagingMetrics = MessagingMetrics {
        messages_published: register_counter_vec!(
            "relay_messages_published_total",
            "Total number of messages published",
            &["queue", "backend"]
        )
        .unwrap(),

        publish_failures: register_counter_vec!(
            "relay_publish_failures_total",
            "Total number of publish failures",
            &["queue", "backend", "error"]
        )
        .unwrap(),

        publish_latency: register_histogram_vec!(
            "relay_publish_latency_seconds",
            "Message publish latency in seconds",
            &["queue", "backend"]
        )
        .unwrap(),

        message_size: register_histogram_vec!(
            "relay_message_size_bytes",
            "Encoded message size in bytes",
            &["queue"],
            vec![64.0, 256.0, 1024.0, 4096.0, 16384.0, 65536.0, 262144.0, 1048576.0]
        )
        .unwrap(),

        deliveries: register_counter_vec!(
            "relay_deliveries_total",
            "Drained messages by outcome",
            &["queue", "outcome"]
        )
        .unwrap(),

        delivery_latency: register_histogram_vec!(
            "relay_delivery_latency_seconds",
            "Direct transport send latency in seconds",
            &["queue"]
        )
        .unwrap(),

        drain_runs: register_counter_vec!(
            "relay_drain_runs_total",
            "Drain invocations by result",
            &["queue", "result"]
        )
        .unwrap(),

        pending_after_drain: register_gauge_vec!(
            "relay_pending_after_drain",
            "Deliveries left unacknowledged by the last drain",
            &["queue"]
        )
        .unwrap(),
    };
}

/// Initialize messaging metrics
pub fn init_messaging_metrics() {
    lazy_static::initialize(&MESSAGING_METRICS);
}

/// Render every registered metric in the text exposition format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_counter_exported() {
        init_messaging_metrics();
        MESSAGING_METRICS
            .deliveries
            .with_label_values(&["metrics_test_queue", "delivered"])
            .inc();

        let output = gather_metrics();
        assert!(output.contains("relay_deliveries_total"));
        assert!(output.contains("metrics_test_queue"));
    }
}
