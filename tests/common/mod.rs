//! Common test utilities: an in-process broker and a recording transport

#![allow(dead_code)]

use async_trait::async_trait;
use notification_relay::config::Config;
use notification_relay::messaging::{InMemoryQueueClient, QueueBackend};
use notification_relay::models::NotificationMessage;
use notification_relay::notifications::{DeliveryError, DirectTransport};
use notification_relay::relay::Relay;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub const QUEUE: &str = "email_queue";

/// Transport that remembers every message it was asked to send
#[derive(Default)]
pub struct RecordingTransport {
    attempts: Mutex<Vec<NotificationMessage>>,
    delivered: Mutex<Vec<NotificationMessage>>,
    failing_subjects: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    outage_on_send: Mutex<Option<InMemoryQueueClient>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every send whose subject matches
    pub fn fail_subject(&self, subject: &str) {
        self.failing_subjects.lock().insert(subject.to_string());
    }

    pub fn recover_subject(&self, subject: &str) {
        self.failing_subjects.lock().remove(subject);
    }

    /// Hold every send for this long before answering
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Take the broker down during the next send; the send itself succeeds
    pub fn cut_broker_on_send(&self, broker: &InMemoryQueueClient) {
        *self.outage_on_send.lock() = Some(broker.clone());
    }

    pub fn attempts(&self) -> Vec<NotificationMessage> {
        self.attempts.lock().clone()
    }

    pub fn delivered(&self) -> Vec<NotificationMessage> {
        self.delivered.lock().clone()
    }

    pub fn delivered_subjects(&self) -> Vec<String> {
        self.delivered
            .lock()
            .iter()
            .map(|m| m.subject().to_string())
            .collect()
    }
}

#[async_trait]
impl DirectTransport for RecordingTransport {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, message: &NotificationMessage) -> Result<(), DeliveryError> {
        self.attempts.lock().push(message.clone());

        let outage = self.outage_on_send.lock().take();
        if let Some(broker) = outage {
            broker.set_available(false);
        }

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing_subjects.lock().contains(message.subject()) {
            return Err(DeliveryError::Network("connection reset".to_string()));
        }

        self.delivered.lock().push(message.clone());
        Ok(())
    }
}

/// Configuration pointing at the in-memory backend
pub fn memory_config() -> Config {
    let mut config = Config::default();
    config.queue.backend = QueueBackend::InMemory;
    config.queue.queue_name = QUEUE.to_string();
    config.queue.enable_metrics = false;
    config
}

/// Relay over a fresh in-memory broker; the broker handle is returned for inspection
pub fn memory_relay(config: &Config) -> (Relay, InMemoryQueueClient, Arc<RecordingTransport>) {
    let broker = InMemoryQueueClient::new();
    let transport = RecordingTransport::new();
    let relay = Relay::with_client(config, Arc::new(broker.clone()), transport.clone());
    (relay, broker, transport)
}
