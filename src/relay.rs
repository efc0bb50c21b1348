//! Wiring of queue client, producer, transport and drainer from configuration

use crate::config::Config;
use crate::error::Result;
use crate::messaging::{create_queue_client, QueueClient};
use crate::notifications::{DirectTransport, Drainer, Producer, SmtpEmailTransport};
use std::sync::Arc;

/// The relay's long-lived components
pub struct Relay {
    pub client: Arc<dyn QueueClient>,
    pub producer: Producer,
    pub drainer: Arc<Drainer>,
}

impl Relay {
    /// Build every component with the SMTP transport
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport: Arc<dyn DirectTransport> = Arc::new(SmtpEmailTransport::new(&config.smtp)?);
        Self::with_transport(config, transport)
    }

    /// Build every component around a caller-supplied transport
    pub fn with_transport(config: &Config, transport: Arc<dyn DirectTransport>) -> Result<Self> {
        let client = create_queue_client(&config.queue)?;
        Ok(Self::with_client(config, client, transport))
    }

    pub fn with_client(
        config: &Config,
        client: Arc<dyn QueueClient>,
        transport: Arc<dyn DirectTransport>,
    ) -> Self {
        let producer = Producer::new(Arc::clone(&client), config.queue.queue_name.clone());
        let drainer = Drainer::new(
            Arc::clone(&client),
            transport,
            config.queue.queue_name.clone(),
            config.drainer.clone(),
        )
        .with_dead_letter_queue(config.queue.dead_letter_queue.clone());

        Self {
            client,
            producer,
            drainer: Arc::new(drainer),
        }
    }
}
