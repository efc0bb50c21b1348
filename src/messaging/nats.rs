//! NATS JetStream queue backend
//!
//! Each queue maps to a work-queue stream bound to a subject of the same
//! name, consumed through one durable pull consumer with explicit acks.
//! A closing session naks what it did not acknowledge; anything it could not
//! nak comes back once `ack_wait` expires.

use crate::messaging::config::{NatsConfig, ReconnectPolicy};
use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::traits::{
    Acknowledger, Delivery, MessageStream, QueueClient, QueueHandle, QueueProperties,
};
use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, PullConsumer},
    stream::{RetentionPolicy, StorageType},
    AckKind,
};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Stream names may not contain `.`, `*`, `>` or whitespace
pub(crate) fn stream_name(prefix: &str, queue: &str) -> String {
    let sanitized: String = queue
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' | ' ' | '\t' | '/' | '\\' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();
    format!("{}_{}", prefix, sanitized)
}

/// Queue client on NATS JetStream
pub struct JetStreamQueueClient {
    config: NatsConfig,
    reconnect: ReconnectPolicy,
    context: RwLock<Option<(async_nats::Client, jetstream::Context)>>,
    streams: DashMap<String, jetstream::stream::Stream>,
}

impl JetStreamQueueClient {
    pub fn new(config: NatsConfig, reconnect: ReconnectPolicy) -> Self {
        Self {
            config,
            reconnect,
            context: RwLock::new(None),
            streams: DashMap::new(),
        }
    }

    async fn context(&self) -> MessagingResult<jetstream::Context> {
        if let Some((_, context)) = self.context.read().await.as_ref() {
            return Ok(context.clone());
        }

        let mut guard = self.context.write().await;
        if let Some((_, context)) = guard.as_ref() {
            return Ok(context.clone());
        }

        let client = self.connect_with_backoff().await?;
        let context = jetstream::new(client.clone());
        *guard = Some((client, context.clone()));
        Ok(context)
    }

    async fn connect_with_backoff(&self) -> MessagingResult<async_nats::Client> {
        if self.config.servers.is_empty() {
            return Err(MessagingError::ConfigurationError(
                "no NATS servers configured".to_string(),
            ));
        }

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let servers = self.config.servers.join(",");
        let attempts = self.reconnect.attempts();
        let mut last_error = String::new();

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.reconnect.backoff(attempt - 1)).await;
            }

            let options = async_nats::ConnectOptions::new()
                .name(&self.config.connection_name)
                .connection_timeout(timeout);

            match tokio::time::timeout(timeout, options.connect(servers.as_str())).await {
                Ok(Ok(client)) => {
                    info!(attempt = attempt + 1, "NATS connection established");
                    return Ok(client);
                }
                Ok(Err(e)) => {
                    warn!(attempt = attempt + 1, error = %e, "NATS connection attempt failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    warn!(attempt = attempt + 1, "NATS connection attempt timed out");
                    last_error = format!("timed out after {}ms", self.config.connect_timeout_ms);
                }
            }
        }

        Err(MessagingError::ConnectionFailed(format!(
            "NATS connection failed after {} attempt(s): {}",
            attempts, last_error
        )))
    }

    async fn stream(&self, queue: &QueueHandle) -> MessagingResult<jetstream::stream::Stream> {
        let cached = self.streams.get(queue.name()).map(|entry| entry.value().clone());
        if let Some(stream) = cached {
            return Ok(stream);
        }

        let context = self.context().await?;
        let name = stream_name(&self.config.stream_prefix, queue.name());
        let stream = context
            .get_stream(&name)
            .await
            .map_err(|e| MessagingError::SubscribeFailed(format!("stream '{}': {}", name, e)))?;
        self.streams.insert(queue.name().to_string(), stream.clone());
        Ok(stream)
    }

    async fn consumer(&self, queue: &QueueHandle) -> MessagingResult<PullConsumer> {
        let stream = self.stream(queue).await?;
        let name = self.config.consumer_name.clone();

        stream
            .get_or_create_consumer(
                &name,
                pull::Config {
                    durable_name: Some(name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: Duration::from_secs(self.config.ack_wait_secs),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| MessagingError::SubscribeFailed(format!("consumer '{}': {}", name, e)))
    }
}

#[async_trait]
impl QueueClient for JetStreamQueueClient {
    fn backend(&self) -> &'static str {
        "nats"
    }

    async fn declare_queue(
        &self,
        name: &str,
        properties: QueueProperties,
    ) -> MessagingResult<QueueHandle> {
        if properties.exclusive || properties.auto_delete {
            return Err(MessagingError::ConfigurationError(
                "JetStream streams cannot be exclusive or auto-delete".to_string(),
            ));
        }

        let context = self.context().await?;
        let storage = if properties.durable {
            StorageType::File
        } else {
            StorageType::Memory
        };
        let stream_id = stream_name(&self.config.stream_prefix, name);

        let mut stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: stream_id.clone(),
                subjects: vec![name.to_string()],
                retention: RetentionPolicy::WorkQueue,
                storage,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                MessagingError::ConnectionFailed(format!("stream '{}': {}", stream_id, e))
            })?;

        let info = stream
            .info()
            .await
            .map_err(|e| MessagingError::ConnectionFailed(e.to_string()))?;

        if info.config.storage != storage || info.config.retention != RetentionPolicy::WorkQueue {
            return Err(MessagingError::QueueConfigConflict {
                queue: name.to_string(),
                reason: format!(
                    "stream '{}' exists with storage {:?} and retention {:?}",
                    stream_id, info.config.storage, info.config.retention
                ),
            });
        }

        debug!(queue = name, stream = %stream_id, "Declared JetStream queue");
        self.streams.insert(name.to_string(), stream);

        Ok(QueueHandle::new(name, properties))
    }

    async fn publish(&self, queue: &QueueHandle, payload: &[u8]) -> MessagingResult<()> {
        let context = self.context().await?;

        context
            .publish(queue.name().to_string(), payload.to_vec().into())
            .await
            .map_err(|e| MessagingError::PublishFailed(e.to_string()))?
            .await
            .map_err(|e| MessagingError::PublishFailed(format!("no stream ack: {}", e)))?;

        Ok(())
    }

    async fn subscribe(&self, queue: &QueueHandle) -> MessagingResult<Box<dyn MessageStream>> {
        let consumer = self.consumer(queue).await?;
        Ok(Box::new(JetStreamMessageStream::new(
            consumer,
            self.config.fetch_batch_size.max(1),
        )))
    }

    async fn is_connected(&self) -> bool {
        match self.context.read().await.as_ref() {
            Some((client, _)) => matches!(
                client.connection_state(),
                async_nats::connection::State::Connected
            ),
            None => false,
        }
    }

    async fn close(&self) -> MessagingResult<()> {
        if let Some((client, _)) = self.context.write().await.take() {
            client
                .flush()
                .await
                .map_err(|e| MessagingError::ConnectionFailed(e.to_string()))?;
            info!("NATS connection closed");
        }
        self.streams.clear();
        Ok(())
    }
}

/// Messages a session handed out and nobody acknowledged yet
pub(crate) struct Outstanding<M> {
    held: Arc<Mutex<HashMap<u64, M>>>,
}

impl<M> Clone for Outstanding<M> {
    fn clone(&self) -> Self {
        Self {
            held: Arc::clone(&self.held),
        }
    }
}

impl<M> Outstanding<M> {
    pub(crate) fn new() -> Self {
        Self {
            held: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(crate) fn hold(&self, key: u64, message: M) {
        self.held.lock().insert(key, message);
    }

    pub(crate) fn release(&self, key: u64) -> Option<M> {
        self.held.lock().remove(&key)
    }

    pub(crate) fn take_all(&self) -> Vec<M> {
        self.held.lock().drain().map(|(_, message)| message).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.held.lock().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.held.lock().is_empty()
    }
}

/// Session pulling batches until one comes back empty
///
/// Every yielded message gets a progress ack, restarting its `ack_wait`
/// clock. Whatever is still unacknowledged when the session ends is naked so
/// the next session sees it straight away.
pub struct JetStreamMessageStream {
    consumer: PullConsumer,
    batch: Option<pull::Batch>,
    batch_size: usize,
    yielded_in_batch: usize,
    next_key: u64,
    outstanding: Outstanding<jetstream::Message>,
    closed: bool,
}

impl JetStreamMessageStream {
    fn new(consumer: PullConsumer, batch_size: usize) -> Self {
        Self {
            consumer,
            batch: None,
            batch_size,
            yielded_in_batch: 0,
            next_key: 0,
            outstanding: Outstanding::new(),
            closed: false,
        }
    }
}

#[async_trait]
impl MessageStream for JetStreamMessageStream {
    async fn next(&mut self) -> MessagingResult<Option<Delivery>> {
        loop {
            if self.closed {
                return Ok(None);
            }

            if self.batch.is_none() {
                let batch = self
                    .consumer
                    .fetch()
                    .max_messages(self.batch_size)
                    .messages()
                    .await
                    .map_err(|e| MessagingError::ConsumeFailed(e.to_string()))?;
                self.batch = Some(batch);
                self.yielded_in_batch = 0;
            }

            let next = match self.batch.as_mut() {
                Some(batch) => batch.next().await,
                None => continue,
            };

            match next {
                Some(Ok(message)) => {
                    self.yielded_in_batch += 1;
                    let (tag, redelivered) = match message.info() {
                        Ok(info) => (info.stream_sequence, info.delivered > 1),
                        Err(_) => (0, false),
                    };

                    if let Err(e) = message.ack_with(AckKind::Progress).await {
                        debug!(stream_sequence = tag, error = %e, "Progress ack failed");
                    }

                    let key = self.next_key;
                    self.next_key += 1;
                    let payload = message.payload.to_vec();
                    self.outstanding.hold(key, message);

                    return Ok(Some(Delivery::new(
                        tag,
                        payload,
                        redelivered,
                        Box::new(JetStreamAcker {
                            key,
                            outstanding: self.outstanding.clone(),
                        }),
                    )));
                }
                Some(Err(e)) => return Err(MessagingError::ConsumeFailed(e.to_string())),
                None => {
                    self.batch = None;
                    if self.yielded_in_batch == 0 {
                        self.closed = true;
                        return Ok(None);
                    }
                }
            }
        }
    }

    async fn close(&mut self) -> MessagingResult<()> {
        self.closed = true;
        self.batch = None;

        let pending = self.outstanding.take_all();
        if pending.is_empty() {
            return Ok(());
        }

        let count = pending.len();
        let mut last_error = None;
        for message in pending {
            if let Err(e) = message.ack_with(AckKind::Nak(None)).await {
                last_error = Some(e.to_string());
            }
        }

        match last_error {
            Some(e) => Err(MessagingError::ConsumeFailed(format!(
                "failed to return unacknowledged messages: {}",
                e
            ))),
            None => {
                debug!(returned = count, "Returned unacknowledged messages to stream");
                Ok(())
            }
        }
    }
}

impl Drop for JetStreamMessageStream {
    fn drop(&mut self) {
        if self.outstanding.is_empty() {
            return;
        }

        let pending = self.outstanding.take_all();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for message in pending {
                        let _ = message.ack_with(AckKind::Nak(None)).await;
                    }
                });
            }
            Err(_) => warn!(
                pending = pending.len(),
                "Session dropped outside a runtime; messages return after ack_wait"
            ),
        }
    }
}

struct JetStreamAcker {
    key: u64,
    outstanding: Outstanding<jetstream::Message>,
}

#[async_trait]
impl Acknowledger for JetStreamAcker {
    async fn ack(&self, delivery_tag: u64) -> MessagingResult<()> {
        let message = self.outstanding.release(self.key).ok_or_else(|| {
            MessagingError::AcknowledgeFailed(format!(
                "stream sequence {} was already returned to the stream",
                delivery_tag
            ))
        })?;

        message.ack().await.map_err(|e| {
            MessagingError::AcknowledgeFailed(format!("stream sequence {}: {}", delivery_tag, e))
        })
    }
}
