//! Enqueue and drain of e-mail notifications
//!
//! [`Producer`] validates a notification and publishes it to the durable
//! queue. [`Drainer`] empties that queue on demand, sending every message
//! through a [`DirectTransport`] and acknowledging only what was delivered.

mod config;
mod drainer;
mod email;
mod error;
mod producer;
mod transport;

pub use config::{DrainerConfig, SmtpConfig, TlsMode};
pub use drainer::{DeliveryOutcome, DrainReport, DrainState, Drainer};
pub use email::SmtpEmailTransport;
pub use error::{DeliveryError, DrainError};
pub use producer::Producer;
pub use transport::DirectTransport;
