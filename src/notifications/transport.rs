//! Direct (non-queued) delivery seam

use crate::models::NotificationMessage;
use crate::notifications::error::DeliveryError;
use async_trait::async_trait;

/// Sends one notification immediately, without retry
///
/// Only an `Ok(())` return counts as delivered. Implementations must not
/// swallow failures.
#[async_trait]
pub trait DirectTransport: Send + Sync {
    /// Transport name used in logs
    fn name(&self) -> &'static str;

    async fn send(&self, message: &NotificationMessage) -> Result<(), DeliveryError>;
}
