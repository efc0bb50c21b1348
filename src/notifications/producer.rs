//! Enqueue side of the relay

use crate::messaging::{codec, MessagingResult, QueueClient, MESSAGING_METRICS};
use crate::models::NotificationMessage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Places notifications on the durable queue
///
/// Cheap to clone; every clone shares the same queue client.
#[derive(Clone)]
pub struct Producer {
    client: Arc<dyn QueueClient>,
    queue_name: String,
}

impl Producer {
    pub fn new(client: Arc<dyn QueueClient>, queue_name: impl Into<String>) -> Self {
        Self {
            client,
            queue_name: queue_name.into(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Validate, encode and publish one notification
    ///
    /// Returns once the broker has accepted the message. Errors are returned
    /// unchanged and nothing is retried.
    pub async fn enqueue(
        &self,
        subject: impl Into<String>,
        recipient: impl Into<String>,
        content: impl Into<String>,
    ) -> MessagingResult<()> {
        let message = NotificationMessage::new(subject, recipient, content)?;
        self.enqueue_message(&message).await
    }

    /// Publish an already constructed notification
    pub async fn enqueue_message(&self, message: &NotificationMessage) -> MessagingResult<()> {
        let payload = codec::encode(message)?;
        let backend = self.client.backend();
        let start = Instant::now();

        let result = async {
            let queue = self.client.ensure_queue(&self.queue_name).await?;
            self.client.publish(&queue, &payload).await
        }
        .await;

        match &result {
            Ok(()) => {
                MESSAGING_METRICS
                    .messages_published
                    .with_label_values(&[&self.queue_name, backend])
                    .inc();
                MESSAGING_METRICS
                    .publish_latency
                    .with_label_values(&[&self.queue_name, backend])
                    .observe(start.elapsed().as_secs_f64());
                MESSAGING_METRICS
                    .message_size
                    .with_label_values(&[&self.queue_name])
                    .observe(payload.len() as f64);

                debug!(
                    queue = %self.queue_name,
                    recipient = %message.recipient(),
                    bytes = payload.len(),
                    "Notification enqueued"
                );
            }
            Err(e) => {
                MESSAGING_METRICS
                    .publish_failures
                    .with_label_values(&[&self.queue_name, backend, error_label(e)])
                    .inc();

                warn!(
                    queue = %self.queue_name,
                    recipient = %message.recipient(),
                    error = %e,
                    "Failed to enqueue notification"
                );
            }
        }

        result
    }
}

fn error_label(err: &crate::messaging::MessagingError) -> &'static str {
    use crate::messaging::MessagingError::*;
    match err {
        ConnectionFailed(_) | BackendUnavailable(_) => "connection",
        QueueConfigConflict { .. } => "queue_conflict",
        Timeout(_) => "timeout",
        _ => "publish",
    }
}
