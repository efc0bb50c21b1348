//! Durable queue access for outbound notifications
//!
//! This module provides one [`QueueClient`] interface over several brokers
//! plus the wire codec for queued notifications.
//!
//! # Backends
//!
//! - **AMQP** (RabbitMQ): durable queues, `basic.get` sessions, redelivery
//!   of unacknowledged messages when the session channel closes
//! - **NATS JetStream**: work-queue streams with a durable pull consumer,
//!   redelivery after `ack_wait`
//! - **In-memory**: same semantics inside the process, for tests
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  encode   ┌────────────────────────────┐
//! │   Producer   ├──────────►│ QueueClient::publish       │
//! └──────────────┘           └─────────────┬──────────────┘
//!                                          ▼
//!                                 durable queue (broker)
//!                                          │
//! ┌──────────────┐  decode   ┌─────────────┴──────────────┐
//! │   Drainer    │◄──────────┤ QueueClient::subscribe     │
//! └──────────────┘           │   MessageStream::next      │
//!                            │   Delivery::ack            │
//!                            └────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use notification_relay::messaging::{codec, create_queue_client, MessagingConfig};
//! use notification_relay::models::NotificationMessage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = MessagingConfig::default();
//!     let client = create_queue_client(&config)?;
//!
//!     let queue = client.ensure_queue(&config.queue_name).await?;
//!     let message = NotificationMessage::new("Welcome", "a@x.com", "<b>Hi</b>")?;
//!     client.publish(&queue, &codec::encode(&message)?).await?;
//!
//!     Ok(())
//! }
//! ```

mod amqp;
pub mod codec;
mod config;
mod error;
mod memory;
mod metrics;
mod nats;
mod service;
mod traits;

pub use amqp::{AmqpConnectionManager, AmqpQueueClient};
pub use config::{AmqpConfig, MessagingConfig, NatsConfig, QueueBackend, ReconnectPolicy};
pub use error::{MessagingError, MessagingResult};
pub use memory::InMemoryQueueClient;
pub use metrics::{gather_metrics, init_messaging_metrics, MESSAGING_METRICS};
pub use nats::JetStreamQueueClient;
pub use service::create_queue_client;
pub use traits::{
    Acknowledger, Delivery, MessageStream, QueueClient, QueueHandle, QueueProperties,
};
