//! Queue client trait abstractions

use crate::messaging::error::MessagingResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Properties a queue is declared with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueProperties {
    /// Survives broker restart
    pub durable: bool,
    /// Restricted to the declaring connection
    pub exclusive: bool,
    /// Removed once the last consumer goes away
    pub auto_delete: bool,
}

impl QueueProperties {
    /// Durable, shared, never auto-deleted
    pub const fn durable() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

impl Default for QueueProperties {
    fn default() -> Self {
        Self::durable()
    }
}

/// A queue that has been declared on the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueHandle {
    name: String,
    properties: QueueProperties,
}

impl QueueHandle {
    pub fn new(name: impl Into<String>, properties: QueueProperties) -> Self {
        Self {
            name: name.into(),
            properties,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> QueueProperties {
        self.properties
    }
}

/// Backend-specific acknowledgement of a single delivery
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Mark the delivery with this tag as consumed
    async fn ack(&self, delivery_tag: u64) -> MessagingResult<()>;
}

/// A message handed out by a subscription session
///
/// Acknowledging consumes the delivery. Dropping it without acking leaves the
/// message pending; it is redelivered after the session closes.
pub struct Delivery {
    delivery_tag: u64,
    payload: Vec<u8>,
    redelivered: bool,
    acker: Box<dyn Acknowledger>,
}

impl Delivery {
    pub fn new(
        delivery_tag: u64,
        payload: Vec<u8>,
        redelivered: bool,
        acker: Box<dyn Acknowledger>,
    ) -> Self {
        Self {
            delivery_tag,
            payload,
            redelivered,
            acker,
        }
    }

    /// Broker-assigned tag, only meaningful for acknowledgement
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether the broker delivered this message before
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    /// Acknowledge the message
    pub async fn ack(self) -> MessagingResult<()> {
        self.acker.ack(self.delivery_tag).await
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("delivery_tag", &self.delivery_tag)
            .field("payload_len", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

/// Subscription session over one queue
#[async_trait]
pub trait MessageStream: Send {
    /// Next immediately available message, `None` once the queue is drained
    async fn next(&mut self) -> MessagingResult<Option<Delivery>>;

    /// End the session; unacknowledged deliveries return to the queue
    async fn close(&mut self) -> MessagingResult<()>;
}

/// Durable queue client
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Backend name used in logs and metric labels
    fn backend(&self) -> &'static str;

    /// Declare a queue; identical re-declaration is a no-op
    async fn declare_queue(
        &self,
        name: &str,
        properties: QueueProperties,
    ) -> MessagingResult<QueueHandle>;

    /// Declare a durable, shared, non-auto-delete queue
    async fn ensure_queue(&self, name: &str) -> MessagingResult<QueueHandle> {
        self.declare_queue(name, QueueProperties::durable()).await
    }

    /// Place one message on the queue
    async fn publish(&self, queue: &QueueHandle, payload: &[u8]) -> MessagingResult<()>;

    /// Open a subscription session on the queue
    async fn subscribe(&self, queue: &QueueHandle) -> MessagingResult<Box<dyn MessageStream>>;

    /// Check if the client currently holds a live connection
    async fn is_connected(&self) -> bool;

    /// Close the underlying connection
    async fn close(&self) -> MessagingResult<()>;
}
