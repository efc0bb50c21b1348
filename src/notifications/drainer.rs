//! Drain side of the relay
//!
//! One [`Drainer::drain`] call empties the queue as it stands: it opens a
//! subscription session, hands every decodable message to the direct
//! transport, acknowledges only what was delivered or quarantined, and closes
//! the session once no message is immediately available. Whatever was not
//! acknowledged goes back to the queue for the next call.
//!
//! Undecodable payloads and messages the relay refuses for good are
//! quarantined: moved to the dead-letter queue when one is configured,
//! otherwise logged and dropped.

use crate::messaging::{
    codec, Delivery, MessagingError, QueueClient, QueueHandle, MESSAGING_METRICS,
};
use crate::notifications::config::DrainerConfig;
use crate::notifications::error::DrainError;
use crate::notifications::transport::DirectTransport;
use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Where a drainer currently is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainState {
    Idle,
    Connecting,
    Subscribed,
    Draining,
    Failed,
}

impl fmt::Display for DrainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DrainState::Idle => "idle",
            DrainState::Connecting => "connecting",
            DrainState::Subscribed => "subscribed",
            DrainState::Draining => "draining",
            DrainState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What happened to a single delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Sent and acknowledged
    Delivered,
    /// Send failed or timed out; left on the queue
    Failed,
    /// Undecodable; logged and acknowledged
    Poisoned,
    /// Undecodable; moved to the dead-letter queue and acknowledged
    DeadLettered,
    /// Refused for good by the relay; quarantined and acknowledged
    Rejected,
    /// Sent, but the broker did not take the acknowledgement
    AckFailed,
}

impl DeliveryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Failed => "failed",
            DeliveryOutcome::Poisoned => "poisoned",
            DeliveryOutcome::DeadLettered => "dead_lettered",
            DeliveryOutcome::Rejected => "rejected",
            DeliveryOutcome::AckFailed => "ack_failed",
        }
    }
}

/// Summary of one drain invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DrainReport {
    pub drain_id: Uuid,
    pub queue: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Messages taken from the queue
    pub received: usize,
    pub delivered: usize,
    pub failed: usize,
    pub poisoned: usize,
    pub dead_lettered: usize,
    /// Permanently refused by the relay
    pub rejected: usize,
    pub ack_failures: usize,
    /// Session error that ended the drain early, if any
    pub session_error: Option<String>,
}

impl DrainReport {
    fn new(queue: &str) -> Self {
        Self {
            drain_id: Uuid::new_v4(),
            queue: queue.to_string(),
            started_at: Utc::now(),
            duration_ms: 0,
            received: 0,
            delivered: 0,
            failed: 0,
            poisoned: 0,
            dead_lettered: 0,
            rejected: 0,
            ack_failures: 0,
            session_error: None,
        }
    }

    fn record(&mut self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::Failed => self.failed += 1,
            DeliveryOutcome::Poisoned => self.poisoned += 1,
            DeliveryOutcome::DeadLettered => self.dead_lettered += 1,
            DeliveryOutcome::Rejected => self.rejected += 1,
            DeliveryOutcome::AckFailed => self.ack_failures += 1,
        }
    }

    /// Messages that will be seen again by a later drain
    pub fn left_pending(&self) -> usize {
        self.failed + self.ack_failures
    }

    /// Messages removed from the queue for good
    pub fn acknowledged(&self) -> usize {
        self.delivered + self.poisoned + self.dead_lettered + self.rejected
    }
}

/// Moves queued notifications to the direct transport
pub struct Drainer {
    client: Arc<dyn QueueClient>,
    transport: Arc<dyn DirectTransport>,
    queue_name: String,
    dead_letter_queue: Option<String>,
    config: DrainerConfig,
    lease: Mutex<()>,
    state: RwLock<DrainState>,
}

impl Drainer {
    pub fn new(
        client: Arc<dyn QueueClient>,
        transport: Arc<dyn DirectTransport>,
        queue_name: impl Into<String>,
        config: DrainerConfig,
    ) -> Self {
        Self {
            client,
            transport,
            queue_name: queue_name.into(),
            dead_letter_queue: None,
            config,
            lease: Mutex::new(()),
            state: RwLock::new(DrainState::Idle),
        }
    }

    /// Route undecodable messages to this queue instead of dropping them
    pub fn with_dead_letter_queue(mut self, queue: Option<String>) -> Self {
        self.dead_letter_queue = queue;
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn state(&self) -> DrainState {
        *self.state.read()
    }

    fn transition(&self, next: DrainState) {
        let mut state = self.state.write();
        let previous = *state;
        debug!(queue = %self.queue_name, from = %previous, to = %next, "Drain state change");
        *state = next;
    }

    /// Run one bounded drain of the queue
    ///
    /// Fails with [`DrainError::ConcurrentDrainConflict`] if another drain on
    /// this drainer is still running, with [`DrainError::Connect`] if the
    /// queue cannot be declared or subscribed, and with
    /// [`DrainError::Interrupted`] if the session breaks part way. Per-message
    /// failures never fail the drain; they are counted in the report.
    pub async fn drain(&self) -> Result<DrainReport, DrainError> {
        let _lease = match self.lease.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                MESSAGING_METRICS
                    .drain_runs
                    .with_label_values(&[&self.queue_name, "skipped"])
                    .inc();
                return Err(DrainError::ConcurrentDrainConflict);
            }
        };

        let start = Instant::now();
        let mut report = DrainReport::new(&self.queue_name);

        self.transition(DrainState::Connecting);
        let (queue, dead_letter) = match self.connect().await {
            Ok(handles) => handles,
            Err(e) => return Err(self.abort_start(e)),
        };

        let mut session = match self.client.subscribe(&queue).await {
            Ok(session) => session,
            Err(e) => return Err(self.abort_start(e)),
        };
        self.transition(DrainState::Subscribed);

        let concurrency = self.config.concurrency();
        let limit = self.config.message_limit();
        let mut in_flight = FuturesUnordered::new();
        let mut exhausted = false;
        let mut session_failure = None;

        loop {
            while !exhausted
                && in_flight.len() < concurrency
                && limit.map_or(true, |max| report.received < max)
            {
                match session.next().await {
                    Ok(Some(delivery)) => {
                        if report.received == 0 {
                            self.transition(DrainState::Draining);
                        }
                        report.received += 1;
                        in_flight.push(self.handle(delivery, dead_letter.as_ref()));
                    }
                    Ok(None) => exhausted = true,
                    Err(e) => {
                        warn!(queue = %self.queue_name, error = %e, "Drain session failed");
                        report.session_error = Some(e.to_string());
                        session_failure = Some(e);
                        exhausted = true;
                    }
                }
            }

            match in_flight.next().await {
                Some(outcome) => {
                    MESSAGING_METRICS
                        .deliveries
                        .with_label_values(&[&self.queue_name, outcome.as_str()])
                        .inc();
                    report.record(outcome);
                }
                None => break,
            }
        }
        drop(in_flight);

        if let Err(e) = session.close().await {
            warn!(queue = %self.queue_name, error = %e, "Failed to close drain session");
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        MESSAGING_METRICS
            .pending_after_drain
            .with_label_values(&[&self.queue_name])
            .set(report.left_pending() as f64);

        if let Some(source) = session_failure {
            self.transition(DrainState::Failed);
            MESSAGING_METRICS
                .drain_runs
                .with_label_values(&[&self.queue_name, "failed"])
                .inc();
            error!(
                queue = %self.queue_name,
                drain_id = %report.drain_id,
                received = report.received,
                delivered = report.delivered,
                left_pending = report.left_pending(),
                error = %source,
                "Drain interrupted; unacknowledged messages stay queued"
            );
            self.transition(DrainState::Idle);
            return Err(DrainError::Interrupted {
                source,
                report: Box::new(report),
            });
        }

        self.transition(DrainState::Idle);
        MESSAGING_METRICS
            .drain_runs
            .with_label_values(&[&self.queue_name, "completed"])
            .inc();

        if report.received > 0 {
            info!(
                queue = %self.queue_name,
                drain_id = %report.drain_id,
                received = report.received,
                delivered = report.delivered,
                failed = report.failed,
                poisoned = report.poisoned + report.dead_lettered,
                rejected = report.rejected,
                duration_ms = report.duration_ms,
                "Drain completed"
            );
        } else {
            debug!(queue = %self.queue_name, "Drain found no messages");
        }

        Ok(report)
    }

    fn abort_start(&self, err: MessagingError) -> DrainError {
        self.transition(DrainState::Failed);
        error!(queue = %self.queue_name, error = %err, "Drain could not start");
        MESSAGING_METRICS
            .drain_runs
            .with_label_values(&[&self.queue_name, "failed"])
            .inc();
        self.transition(DrainState::Idle);
        DrainError::Connect(err)
    }

    async fn connect(&self) -> Result<(QueueHandle, Option<QueueHandle>), MessagingError> {
        let queue = self.client.ensure_queue(&self.queue_name).await?;
        let dead_letter = match &self.dead_letter_queue {
            Some(name) => Some(self.client.ensure_queue(name).await?),
            None => None,
        };
        Ok((queue, dead_letter))
    }

    async fn handle(
        &self,
        delivery: Delivery,
        dead_letter: Option<&QueueHandle>,
    ) -> DeliveryOutcome {
        let tag = delivery.delivery_tag();

        let message = match codec::decode(delivery.payload()) {
            Ok(message) => message,
            Err(e) => {
                return match self.quarantine(delivery, dead_letter, &e.to_string()).await {
                    Ok(Quarantined::DeadLettered) => DeliveryOutcome::DeadLettered,
                    Ok(Quarantined::Discarded) => DeliveryOutcome::Poisoned,
                    Err(outcome) => outcome,
                };
            }
        };

        let start = Instant::now();
        let sent =
            tokio::time::timeout(self.config.send_timeout(), self.transport.send(&message)).await;
        MESSAGING_METRICS
            .delivery_latency
            .with_label_values(&[&self.queue_name])
            .observe(start.elapsed().as_secs_f64());

        match sent {
            Ok(Ok(())) => match delivery.ack().await {
                Ok(()) => {
                    debug!(
                        queue = %self.queue_name,
                        delivery_tag = tag,
                        recipient = %message.recipient(),
                        "Notification delivered"
                    );
                    DeliveryOutcome::Delivered
                }
                Err(e) => {
                    error!(
                        queue = %self.queue_name,
                        delivery_tag = tag,
                        recipient = %message.recipient(),
                        error = %e,
                        "Notification sent but acknowledgement failed; it will be sent again"
                    );
                    DeliveryOutcome::AckFailed
                }
            },
            Ok(Err(e)) if e.is_permanent() => {
                warn!(
                    queue = %self.queue_name,
                    delivery_tag = tag,
                    recipient = %message.recipient(),
                    transport = self.transport.name(),
                    kind = e.kind(),
                    error = %e,
                    "Relay refused notification for good; removing it from the queue"
                );
                match self.quarantine(delivery, dead_letter, &e.to_string()).await {
                    Ok(_) => DeliveryOutcome::Rejected,
                    Err(outcome) => outcome,
                }
            }
            Ok(Err(e)) => {
                warn!(
                    queue = %self.queue_name,
                    delivery_tag = tag,
                    recipient = %message.recipient(),
                    transport = self.transport.name(),
                    kind = e.kind(),
                    error = %e,
                    "Delivery failed; leaving message queued"
                );
                DeliveryOutcome::Failed
            }
            Err(_) => {
                warn!(
                    queue = %self.queue_name,
                    delivery_tag = tag,
                    recipient = %message.recipient(),
                    timeout_secs = self.config.send_timeout_secs,
                    "Delivery timed out; leaving message queued"
                );
                DeliveryOutcome::Failed
            }
        }
    }

    /// Move a delivery out of the queue without sending it
    ///
    /// On `Err` the delivery was not acknowledged (or the ack was lost) and
    /// the outcome to record is returned.
    async fn quarantine(
        &self,
        delivery: Delivery,
        dead_letter: Option<&QueueHandle>,
        reason: &str,
    ) -> Result<Quarantined, DeliveryOutcome> {
        let tag = delivery.delivery_tag();

        let quarantined = match dead_letter {
            Some(dlq) => {
                if let Err(e) = self.client.publish(dlq, delivery.payload()).await {
                    error!(
                        queue = %self.queue_name,
                        dead_letter_queue = dlq.name(),
                        delivery_tag = tag,
                        error = %e,
                        "Failed to dead-letter message; leaving it queued"
                    );
                    return Err(DeliveryOutcome::Failed);
                }
                warn!(
                    queue = %self.queue_name,
                    dead_letter_queue = dlq.name(),
                    delivery_tag = tag,
                    reason,
                    "Moved message to dead-letter queue"
                );
                Quarantined::DeadLettered
            }
            None => {
                error!(
                    queue = %self.queue_name,
                    delivery_tag = tag,
                    bytes = delivery.payload().len(),
                    reason,
                    "Discarding message"
                );
                Quarantined::Discarded
            }
        };

        match delivery.ack().await {
            Ok(()) => Ok(quarantined),
            Err(e) => {
                error!(
                    queue = %self.queue_name,
                    delivery_tag = tag,
                    error = %e,
                    "Failed to acknowledge quarantined message"
                );
                Err(DeliveryOutcome::AckFailed)
            }
        }
    }
}

enum Quarantined {
    DeadLettered,
    Discarded,
}
