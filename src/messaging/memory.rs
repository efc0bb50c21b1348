//! In-process queue backend
//!
//! Mirrors the broker semantics the drainer relies on: declared queues keep
//! their properties, deliveries stay unacknowledged until acked, and whatever
//! a session leaves unacknowledged goes back to the head of the queue when the
//! session ends.

use crate::messaging::error::{MessagingError, MessagingResult};
use crate::messaging::traits::{
    Acknowledger, Delivery, MessageStream, QueueClient, QueueHandle, QueueProperties,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    delivery_count: u32,
}

#[derive(Debug)]
struct QueueState {
    properties: QueueProperties,
    ready: VecDeque<StoredMessage>,
    unacked: BTreeMap<u64, StoredMessage>,
}

#[derive(Debug)]
struct Broker {
    queues: HashMap<String, QueueState>,
    next_tag: u64,
    available: bool,
    closed: bool,
    refusing: HashSet<String>,
}

impl Broker {
    fn check_reachable(&self) -> MessagingResult<()> {
        if self.closed {
            return Err(MessagingError::BackendUnavailable(
                "in-memory client closed".to_string(),
            ));
        }
        if !self.available {
            return Err(MessagingError::ConnectionFailed(
                "in-memory broker unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn requeue(&mut self, queue: &str, tags: &[u64]) -> usize {
        let Some(state) = self.queues.get_mut(queue) else {
            return 0;
        };

        let mut requeued = 0;
        for tag in tags.iter().rev() {
            if let Some(message) = state.unacked.remove(tag) {
                state.ready.push_front(message);
                requeued += 1;
            }
        }
        requeued
    }
}

/// Queue client backed by process memory
///
/// Clones share the same broker state, so a test can keep one clone for
/// inspection while the producer and drainer use others.
#[derive(Clone)]
pub struct InMemoryQueueClient {
    broker: Arc<Mutex<Broker>>,
}

impl InMemoryQueueClient {
    pub fn new() -> Self {
        Self {
            broker: Arc::new(Mutex::new(Broker {
                queues: HashMap::new(),
                next_tag: 1,
                available: true,
                closed: false,
                refusing: HashSet::new(),
            })),
        }
    }

    /// Simulate the broker going away or coming back
    pub fn set_available(&self, available: bool) {
        self.broker.lock().available = available;
    }

    /// Make publishes to one queue fail while everything else keeps working
    pub fn refuse_publishes(&self, queue: &str, refuse: bool) {
        let mut broker = self.broker.lock();
        if refuse {
            broker.refusing.insert(queue.to_string());
        } else {
            broker.refusing.remove(queue);
        }
    }

    /// Messages waiting to be delivered
    pub fn ready_count(&self, queue: &str) -> usize {
        self.broker
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or(0)
    }

    /// Messages delivered to an open session but not yet acknowledged
    pub fn unacked_count(&self, queue: &str) -> usize {
        self.broker
            .lock()
            .queues
            .get(queue)
            .map(|q| q.unacked.len())
            .unwrap_or(0)
    }

    /// Copy of the payloads waiting on a queue, head first
    pub fn ready_payloads(&self, queue: &str) -> Vec<Vec<u8>> {
        self.broker
            .lock()
            .queues
            .get(queue)
            .map(|q| q.ready.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.broker.lock().queues.contains_key(queue)
    }
}

impl Default for InMemoryQueueClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueClient for InMemoryQueueClient {
    fn backend(&self) -> &'static str {
        "in_memory"
    }

    async fn declare_queue(
        &self,
        name: &str,
        properties: QueueProperties,
    ) -> MessagingResult<QueueHandle> {
        let mut broker = self.broker.lock();
        broker.check_reachable()?;

        if let Some(existing) = broker.queues.get(name) {
            if existing.properties != properties {
                return Err(MessagingError::QueueConfigConflict {
                    queue: name.to_string(),
                    reason: format!(
                        "declared as {:?}, requested {:?}",
                        existing.properties, properties
                    ),
                });
            }
            return Ok(QueueHandle::new(name, properties));
        }

        broker.queues.insert(
            name.to_string(),
            QueueState {
                properties,
                ready: VecDeque::new(),
                unacked: BTreeMap::new(),
            },
        );
        debug!(queue = name, "Declared in-memory queue");
        Ok(QueueHandle::new(name, properties))
    }

    async fn publish(&self, queue: &QueueHandle, payload: &[u8]) -> MessagingResult<()> {
        let mut broker = self.broker.lock();
        broker.check_reachable()?;

        if broker.refusing.contains(queue.name()) {
            return Err(MessagingError::PublishFailed(format!(
                "queue '{}' refused the message",
                queue.name()
            )));
        }

        let state = broker.queues.get_mut(queue.name()).ok_or_else(|| {
            MessagingError::PublishFailed(format!("queue '{}' is not declared", queue.name()))
        })?;

        state.ready.push_back(StoredMessage {
            payload: payload.to_vec(),
            delivery_count: 0,
        });
        Ok(())
    }

    async fn subscribe(&self, queue: &QueueHandle) -> MessagingResult<Box<dyn MessageStream>> {
        {
            let broker = self.broker.lock();
            broker.check_reachable()?;
            if !broker.queues.contains_key(queue.name()) {
                return Err(MessagingError::SubscribeFailed(format!(
                    "queue '{}' is not declared",
                    queue.name()
                )));
            }
        }

        Ok(Box::new(InMemoryMessageStream {
            broker: Arc::clone(&self.broker),
            queue: queue.name().to_string(),
            outstanding: Vec::new(),
            closed: false,
        }))
    }

    async fn is_connected(&self) -> bool {
        self.broker.lock().check_reachable().is_ok()
    }

    async fn close(&self) -> MessagingResult<()> {
        self.broker.lock().closed = true;
        Ok(())
    }
}

/// Subscription session on an in-memory queue
pub struct InMemoryMessageStream {
    broker: Arc<Mutex<Broker>>,
    queue: String,
    outstanding: Vec<u64>,
    closed: bool,
}

impl InMemoryMessageStream {
    fn release(&mut self) -> usize {
        if self.closed {
            return 0;
        }
        self.closed = true;
        let tags = std::mem::take(&mut self.outstanding);
        self.broker.lock().requeue(&self.queue, &tags)
    }
}

#[async_trait]
impl MessageStream for InMemoryMessageStream {
    async fn next(&mut self) -> MessagingResult<Option<Delivery>> {
        if self.closed {
            return Ok(None);
        }

        let mut broker = self.broker.lock();
        broker.check_reachable()?;

        let tag = broker.next_tag;
        let state = broker.queues.get_mut(&self.queue).ok_or_else(|| {
            MessagingError::ConsumeFailed(format!("queue '{}' was deleted", self.queue))
        })?;

        let Some(mut message) = state.ready.pop_front() else {
            return Ok(None);
        };

        let redelivered = message.delivery_count > 0;
        message.delivery_count += 1;
        let payload = message.payload.clone();
        state.unacked.insert(tag, message);
        broker.next_tag += 1;
        drop(broker);

        self.outstanding.push(tag);

        Ok(Some(Delivery::new(
            tag,
            payload,
            redelivered,
            Box::new(InMemoryAcker {
                broker: Arc::clone(&self.broker),
                queue: self.queue.clone(),
            }),
        )))
    }

    async fn close(&mut self) -> MessagingResult<()> {
        let requeued = self.release();
        if requeued > 0 {
            debug!(queue = %self.queue, requeued, "Returned unacknowledged messages to queue");
        }
        Ok(())
    }
}

impl Drop for InMemoryMessageStream {
    fn drop(&mut self) {
        self.release();
    }
}

struct InMemoryAcker {
    broker: Arc<Mutex<Broker>>,
    queue: String,
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(&self, delivery_tag: u64) -> MessagingResult<()> {
        let mut broker = self.broker.lock();
        broker.check_reachable()?;

        broker
            .queues
            .get_mut(&self.queue)
            .and_then(|state| state.unacked.remove(&delivery_tag))
            .map(|_| ())
            .ok_or_else(|| {
                MessagingError::AcknowledgeFailed(format!(
                    "unknown delivery tag {} on '{}'",
                    delivery_tag, self.queue
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_declare_is_idempotent() {
        let client = InMemoryQueueClient::new();
        let first = client.ensure_queue("q").await.unwrap();
        let second = client.ensure_queue("q").await.unwrap();
        assert_eq!(first, second);
        assert!(first.properties().durable);
    }

    #[tokio::test]
    async fn test_conflicting_declare() {
        let client = InMemoryQueueClient::new();
        client.ensure_queue("q").await.unwrap();

        let transient = QueueProperties {
            durable: false,
            ..QueueProperties::durable()
        };
        let result = client.declare_queue("q", transient).await;
        assert!(matches!(result, Err(MessagingError::QueueConfigConflict { .. })));
    }

    #[tokio::test]
    async fn test_ack_removes_message() {
        let client = InMemoryQueueClient::new();
        let queue = client.ensure_queue("q").await.unwrap();
        client.publish(&queue, b"one").await.unwrap();

        let mut stream = client.subscribe(&queue).await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        assert_eq!(delivery.payload(), b"one");
        assert!(!delivery.redelivered());
        delivery.ack().await.unwrap();
        stream.close().await.unwrap();

        assert_eq!(client.ready_count("q"), 0);
        assert_eq!(client.unacked_count("q"), 0);
    }

    #[tokio::test]
    async fn test_unacked_is_requeued_in_order_on_close() {
        let client = InMemoryQueueClient::new();
        let queue = client.ensure_queue("q").await.unwrap();
        for payload in [b"a", b"b", b"c"] {
            client.publish(&queue, payload).await.unwrap();
        }

        let mut stream = client.subscribe(&queue).await.unwrap();
        let a = stream.next().await.unwrap().unwrap();
        let b = stream.next().await.unwrap().unwrap();
        b.ack().await.unwrap();
        drop(a);
        assert_eq!(client.unacked_count("q"), 1);
        stream.close().await.unwrap();

        assert_eq!(
            client.ready_payloads("q"),
            vec![b"a".to_vec(), b"c".to_vec()]
        );

        let mut stream = client.subscribe(&queue).await.unwrap();
        let again = stream.next().await.unwrap().unwrap();
        assert_eq!(again.payload(), b"a");
        assert!(again.redelivered());
    }

    #[tokio::test]
    async fn test_drop_requeues() {
        let client = InMemoryQueueClient::new();
        let queue = client.ensure_queue("q").await.unwrap();
        client.publish(&queue, b"x").await.unwrap();

        {
            let mut stream = client.subscribe(&queue).await.unwrap();
            let _delivery = stream.next().await.unwrap().unwrap();
        }

        assert_eq!(client.ready_count("q"), 1);
    }

    #[tokio::test]
    async fn test_session_does_not_redeliver_its_own_unacked() {
        let client = InMemoryQueueClient::new();
        let queue = client.ensure_queue("q").await.unwrap();
        client.publish(&queue, b"x").await.unwrap();

        let mut stream = client.subscribe(&queue).await.unwrap();
        let first = stream.next().await.unwrap();
        assert!(first.is_some());
        drop(first);
        assert!(stream.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_broker() {
        let client = InMemoryQueueClient::new();
        client.set_available(false);
        assert!(!client.is_connected().await);

        let result = client.ensure_queue("q").await;
        assert!(matches!(result, Err(MessagingError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_refused_publishes_only_hit_that_queue() {
        let client = InMemoryQueueClient::new();
        let refusing = client.ensure_queue("dead").await.unwrap();
        let open = client.ensure_queue("q").await.unwrap();
        client.refuse_publishes("dead", true);

        let result = client.publish(&refusing, b"x").await;
        assert!(matches!(result, Err(MessagingError::PublishFailed(_))));
        client.publish(&open, b"y").await.unwrap();

        client.refuse_publishes("dead", false);
        client.publish(&refusing, b"x").await.unwrap();
        assert_eq!(client.ready_count("dead"), 1);
    }

    #[tokio::test]
    async fn test_publish_to_undeclared_queue_fails() {
        let client = InMemoryQueueClient::new();
        let handle = QueueHandle::new("missing", QueueProperties::durable());
        let result = client.publish(&handle, b"x").await;
        assert!(matches!(result, Err(MessagingError::PublishFailed(_))));
    }

    #[tokio::test]
    async fn test_double_ack_is_impossible_after_requeue() {
        let client = InMemoryQueueClient::new();
        let queue = client.ensure_queue("q").await.unwrap();
        client.publish(&queue, b"x").await.unwrap();

        let mut stream = client.subscribe(&queue).await.unwrap();
        let delivery = stream.next().await.unwrap().unwrap();
        stream.close().await.unwrap();

        // The session is gone, so the broker no longer knows the tag.
        let result = delivery.ack().await;
        assert!(matches!(result, Err(MessagingError::AcknowledgeFailed(_))));
        assert_eq!(client.ready_count("q"), 1);
    }
}
