//! AMQP 0-9-1 queue backend (RabbitMQ)
//!
//! One connection is shared by the whole process and re-established on
//! demand; every declare, publish and subscription session gets its own
//! channel. Closing a channel returns its unacknowledged deliveries to the
//! queue, which is what gives the drainer its at-least-once redelivery.

use crate::messaging::config::{AmqpConfig, ReconnectPolicy};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::traits::{
    Acknowledger, Delivery, MessageStream, QueueClient, QueueHandle, QueueProperties,
};
use async_trait::async_trait;
use lapin::{
    acker::Acker,
    options::{
        BasicAckOptions, BasicGetOptions, BasicPublishOptions, ConfirmSelectOptions,
        QueueDeclareOptions,
    },
    protocol::{AMQPErrorKind, AMQPSoftError},
    types::FieldTable,
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const REPLY_SUCCESS: u16 = 200;
const PERSISTENT: u8 = 2;

fn map_declare_error(queue: &str, err: lapin::Error) -> MessagingError {
    match &err {
        lapin::Error::ProtocolError(amqp_error)
            if matches!(
                amqp_error.kind(),
                AMQPErrorKind::Soft(AMQPSoftError::PRECONDITIONFAILED)
            ) =>
        {
            MessagingError::QueueConfigConflict {
                queue: queue.to_string(),
                reason: amqp_error.to_string(),
            }
        }
        _ => MessagingError::ConnectionFailed(format!("queue declare failed: {}", err)),
    }
}

/// Lazily established, reconnect-on-failure AMQP connection
pub struct AmqpConnectionManager {
    config: AmqpConfig,
    reconnect: ReconnectPolicy,
    connection: RwLock<Option<Arc<Connection>>>,
    closed: RwLock<bool>,
}

impl AmqpConnectionManager {
    pub fn new(config: AmqpConfig, reconnect: ReconnectPolicy) -> Self {
        Self {
            config,
            reconnect,
            connection: RwLock::new(None),
            closed: RwLock::new(false),
        }
    }

    /// Return the live connection, reconnecting if it was lost
    pub async fn connection(&self) -> MessagingResult<Arc<Connection>> {
        if *self.closed.read().await {
            return Err(MessagingError::BackendUnavailable(
                "AMQP client closed".to_string(),
            ));
        }

        {
            let guard = self.connection.read().await;
            if let Some(conn) = guard.as_ref() {
                if conn.status().connected() {
                    return Ok(Arc::clone(conn));
                }
            }
        }

        let mut guard = self.connection.write().await;
        if let Some(conn) = guard.as_ref() {
            if conn.status().connected() {
                return Ok(Arc::clone(conn));
            }
            warn!("AMQP connection lost, reconnecting");
        }

        let conn = Arc::new(self.connect_with_backoff().await?);
        *guard = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Open a fresh channel for one logical operation
    pub async fn channel(&self) -> MessagingResult<Channel> {
        let conn = self.connection().await?;
        match conn.create_channel().await {
            Ok(channel) => Ok(channel),
            Err(e) => {
                self.invalidate().await;
                Err(MessagingError::ConnectionFailed(format!(
                    "failed to open channel: {}",
                    e
                )))
            }
        }
    }

    async fn invalidate(&self) {
        self.connection.write().await.take();
    }

    async fn connect_with_backoff(&self) -> MessagingResult<Connection> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let attempts = self.reconnect.attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.reconnect.backoff(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying AMQP connection");
                tokio::time::sleep(delay).await;
            }

            let properties = ConnectionProperties::default()
                .with_connection_name(self.config.connection_name.clone().into());

            match tokio::time::timeout(timeout, Connection::connect(&self.config.uri, properties))
                .await
            {
                Ok(Ok(conn)) => {
                    info!(attempt = attempt + 1, "AMQP connection established");
                    return Ok(conn);
                }
                Ok(Err(e)) => {
                    warn!(attempt = attempt + 1, error = %e, "AMQP connection attempt failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(
                        attempt = attempt + 1,
                        timeout_ms = self.config.connect_timeout_ms,
                        "AMQP connection attempt timed out"
                    );
                    last_error = format!("timed out after {}ms", self.config.connect_timeout_ms);
                }
            }
        }

        Err(MessagingError::ConnectionFailed(format!(
            "AMQP connection failed after {} attempt(s): {}",
            attempts, last_error
        )))
    }

    pub async fn is_connected(&self) -> bool {
        self.connection
            .read()
            .await
            .as_ref()
            .map(|conn| conn.status().connected())
            .unwrap_or(false)
    }

    pub async fn close(&self) -> MessagingResult<()> {
        *self.closed.write().await = true;
        if let Some(conn) = self.connection.write().await.take() {
            conn.close(REPLY_SUCCESS, "shutdown")
                .await
                .map_err(|e| MessagingError::ConnectionFailed(e.to_string()))?;
            info!("AMQP connection closed");
        }
        Ok(())
    }
}

/// Queue client speaking AMQP 0-9-1
pub struct AmqpQueueClient {
    manager: AmqpConnectionManager,
    publisher_confirms: bool,
}

impl AmqpQueueClient {
    pub fn new(config: AmqpConfig, reconnect: ReconnectPolicy) -> Self {
        let publisher_confirms = config.publisher_confirms;
        Self {
            manager: AmqpConnectionManager::new(config, reconnect),
            publisher_confirms,
        }
    }

    /// Establish the shared connection eagerly
    pub async fn connect(&self) -> MessagingResult<()> {
        self.manager.connection().await.map(|_| ())
    }
}

#[async_trait]
impl QueueClient for AmqpQueueClient {
    fn backend(&self) -> &'static str {
        "amqp"
    }

    async fn declare_queue(
        &self,
        name: &str,
        properties: QueueProperties,
    ) -> MessagingResult<QueueHandle> {
        let channel = self.manager.channel().await?;

        let options = QueueDeclareOptions {
            durable: properties.durable,
            exclusive: properties.exclusive,
            auto_delete: properties.auto_delete,
            ..Default::default()
        };

        let queue = channel
            .queue_declare(name, options, FieldTable::default())
            .await
            .map_err(|e| map_declare_error(name, e))?;

        debug!(
            queue = name,
            messages = queue.message_count(),
            consumers = queue.consumer_count(),
            "Declared AMQP queue"
        );

        // A rejected declare already closed the channel server-side.
        let _ = channel.close(REPLY_SUCCESS, "declare complete").await;

        Ok(QueueHandle::new(name, properties))
    }

    async fn publish(&self, queue: &QueueHandle, payload: &[u8]) -> MessagingResult<()> {
        let channel = self.manager.channel().await?;

        if self.publisher_confirms {
            channel
                .confirm_select(ConfirmSelectOptions::default())
                .await
                .map_err(|e| MessagingError::PublishFailed(format!("confirm select: {}", e)))?;
        }

        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into());

        let confirmation = channel
            .basic_publish(
                "",
                queue.name(),
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| MessagingError::PublishFailed(e.to_string()))?
            .await
            .map_err(|e| MessagingError::PublishFailed(e.to_string()))?;

        if confirmation.is_nack() {
            return Err(MessagingError::PublishFailed(format!(
                "broker rejected message for '{}'",
                queue.name()
            )));
        }

        if let Err(e) = channel.close(REPLY_SUCCESS, "publish complete").await {
            debug!(error = %e, "Failed to close publish channel");
        }

        Ok(())
    }

    async fn subscribe(&self, queue: &QueueHandle) -> MessagingResult<Box<dyn MessageStream>> {
        let channel = self.manager.channel().await?;
        Ok(Box::new(AmqpMessageStream {
            channel,
            queue: queue.name().to_string(),
            closed: false,
        }))
    }

    async fn is_connected(&self) -> bool {
        self.manager.is_connected().await
    }

    async fn close(&self) -> MessagingResult<()> {
        self.manager.close().await
    }
}

/// Subscription session pulling with `basic.get` on a dedicated channel
pub struct AmqpMessageStream {
    channel: Channel,
    queue: String,
    closed: bool,
}

#[async_trait]
impl MessageStream for AmqpMessageStream {
    async fn next(&mut self) -> MessagingResult<Option<Delivery>> {
        if self.closed {
            return Ok(None);
        }

        let message = self
            .channel
            .basic_get(&self.queue, BasicGetOptions::default())
            .await
            .map_err(|e| MessagingError::ConsumeFailed(e.to_string()))?;

        Ok(message.map(|message| {
            let delivery = message.delivery;
            Delivery::new(
                delivery.delivery_tag,
                delivery.data,
                delivery.redelivered,
                Box::new(AmqpAcker {
                    acker: delivery.acker,
                }),
            )
        }))
    }

    async fn close(&mut self) -> MessagingResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.channel
            .close(REPLY_SUCCESS, "drain complete")
            .await
            .map_err(|e| MessagingError::ConsumeFailed(format!("channel close: {}", e)))
    }
}

struct AmqpAcker {
    acker: Acker,
}

#[async_trait]
impl Acknowledger for AmqpAcker {
    async fn ack(&self, delivery_tag: u64) -> MessagingResult<()> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| {
                MessagingError::AcknowledgeFailed(format!("delivery tag {}: {}", delivery_tag, e))
            })
    }
}
