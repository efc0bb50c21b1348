//! Durable, queued e-mail notification relay
//!
//! Callers enqueue notifications through a [`notifications::Producer`]; a
//! scheduled [`notifications::Drainer`] later empties the queue, hands each
//! message to a direct SMTP transport and acknowledges only what was
//! delivered. Broker access is abstracted behind
//! [`messaging::QueueClient`] with AMQP, NATS JetStream and in-memory
//! backends.

pub mod api;
pub mod config;
pub mod error;
pub mod messaging;
pub mod models;
pub mod notifications;
pub mod relay;
pub mod scheduler;
pub mod telemetry;

pub use error::{AppError, Result};
