//! Queue client construction

use crate::messaging::amqp::AmqpQueueClient;
use crate::messaging::config::{MessagingConfig, QueueBackend};
use crate::messaging::error::MessagingResult;
use crate::messaging::memory::InMemoryQueueClient;
use crate::messaging::nats::JetStreamQueueClient;
use crate::messaging::traits::QueueClient;
use std::sync::Arc;
use tracing::info;

/// Build the queue client selected by configuration
///
/// The returned client connects lazily; call [`QueueClient::ensure_queue`] to
/// verify connectivity at startup.
pub fn create_queue_client(config: &MessagingConfig) -> MessagingResult<Arc<dyn QueueClient>> {
    if config.enable_metrics {
        crate::messaging::metrics::init_messaging_metrics();
    }

    let client: Arc<dyn QueueClient> = match config.backend {
        QueueBackend::Amqp => Arc::new(AmqpQueueClient::new(
            config.amqp.clone(),
            config.reconnect.clone(),
        )),
        QueueBackend::Nats => Arc::new(JetStreamQueueClient::new(
            config.nats.clone(),
            config.reconnect.clone(),
        )),
        QueueBackend::InMemory => Arc::new(InMemoryQueueClient::new()),
    };

    info!(
        backend = client.backend(),
        queue = %config.queue_name,
        dead_letter_queue = ?config.dead_letter_queue,
        "Queue client created"
    );

    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_backend() {
        let config = MessagingConfig {
            backend: QueueBackend::InMemory,
            enable_metrics: false,
            ..Default::default()
        };

        let client = create_queue_client(&config).unwrap();
        assert_eq!(client.backend(), "in_memory");
        assert!(client.ensure_queue(&config.queue_name).await.is_ok());
    }

    #[test]
    fn test_amqp_backend_is_default() {
        let config = MessagingConfig {
            enable_metrics: false,
            ..Default::default()
        };
        let client = create_queue_client(&config).unwrap();
        assert_eq!(client.backend(), "amqp");
    }
}
