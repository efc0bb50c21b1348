//! End-to-end enqueue and drain behaviour against the in-process broker

mod common;

use common::{memory_config, memory_relay, QUEUE};
use notification_relay::messaging::{codec, QueueClient, QueueProperties};
use notification_relay::models::NotificationMessage;
use notification_relay::notifications::{DrainError, DrainState};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_single_message_delivered_and_removed() {
    let (relay, broker, transport) = memory_relay(&memory_config());

    relay
        .producer
        .enqueue("Welcome", "a@x.com", "Hi")
        .await
        .expect("enqueue failed");

    let report = relay.drainer.drain().await.expect("drain failed");

    assert_eq!(report.received, 1);
    assert_eq!(report.delivered, 1);

    let delivered = transport.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].subject(), "Welcome");
    assert_eq!(delivered[0].recipient(), "a@x.com");
    assert_eq!(delivered[0].content(), "Hi");

    assert_eq!(broker.ready_count(QUEUE), 0);
    assert_eq!(broker.unacked_count(QUEUE), 0);
}

#[tokio::test]
async fn test_failed_delivery_stays_queued() {
    let (relay, broker, transport) = memory_relay(&memory_config());
    transport.fail_subject("S1");

    relay.producer.enqueue("S1", "a@x.com", "one").await.unwrap();
    relay.producer.enqueue("S2", "b@x.com", "two").await.unwrap();

    let report = relay.drainer.drain().await.unwrap();

    assert_eq!(report.received, 2);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(transport.delivered_subjects(), vec!["S2".to_string()]);

    let remaining = broker.ready_payloads(QUEUE);
    assert_eq!(remaining.len(), 1);
    assert_eq!(codec::decode(&remaining[0]).unwrap().subject(), "S1");
}

#[tokio::test]
async fn test_failed_message_redelivered_next_drain() {
    let (relay, broker, transport) = memory_relay(&memory_config());
    transport.fail_subject("Retry me");

    relay
        .producer
        .enqueue("Retry me", "a@x.com", "body")
        .await
        .unwrap();

    let first = relay.drainer.drain().await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(broker.ready_count(QUEUE), 1);

    transport.recover_subject("Retry me");
    let second = relay.drainer.drain().await.unwrap();
    assert_eq!(second.delivered, 1);
    assert_eq!(broker.ready_count(QUEUE), 0);

    assert_eq!(transport.attempts().len(), 2);
    assert_eq!(transport.delivered().len(), 1);
}

#[tokio::test]
async fn test_failed_message_attempted_once_per_drain() {
    let (relay, _broker, transport) = memory_relay(&memory_config());
    transport.fail_subject("Down");

    relay.producer.enqueue("Down", "a@x.com", "x").await.unwrap();

    let report = relay.drainer.drain().await.unwrap();
    assert_eq!(report.received, 1);
    assert_eq!(transport.attempts().len(), 1);
}

#[tokio::test]
async fn test_malformed_envelope_discarded_without_dead_letter_queue() {
    let (relay, broker, transport) = memory_relay(&memory_config());

    let queue = broker.ensure_queue(QUEUE).await.unwrap();
    broker.publish(&queue, b"{\"Subject\": 42").await.unwrap();

    let report = relay.drainer.drain().await.unwrap();

    assert_eq!(report.poisoned, 1);
    assert!(transport.attempts().is_empty());
    assert_eq!(broker.ready_count(QUEUE), 0);
}

#[tokio::test]
async fn test_malformed_envelope_moved_to_dead_letter_queue() {
    let mut config = memory_config();
    config.queue.dead_letter_queue = Some("email_queue.dead".to_string());
    let (relay, broker, transport) = memory_relay(&config);

    let queue = broker.ensure_queue(QUEUE).await.unwrap();
    broker.publish(&queue, b"not json at all").await.unwrap();
    relay.producer.enqueue("Fine", "a@x.com", "ok").await.unwrap();

    let report = relay.drainer.drain().await.unwrap();

    assert_eq!(report.dead_lettered, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(transport.delivered_subjects(), vec!["Fine".to_string()]);
    assert_eq!(broker.ready_count(QUEUE), 0);
    assert_eq!(
        broker.ready_payloads("email_queue.dead"),
        vec![b"not json at all".to_vec()]
    );
}

#[tokio::test]
async fn test_messages_do_not_cross_contaminate() {
    let (relay, _broker, transport) = memory_relay(&memory_config());

    relay.producer.enqueue("A", "a@x.com", "alpha").await.unwrap();
    relay.producer.enqueue("B", "b@x.com", "beta").await.unwrap();
    relay.producer.enqueue("C", "c@x.com", "gamma").await.unwrap();

    relay.drainer.drain().await.unwrap();

    let delivered = transport.delivered();
    assert_eq!(delivered.len(), 3);
    for message in delivered {
        let expected = match message.subject() {
            "A" => ("a@x.com", "alpha"),
            "B" => ("b@x.com", "beta"),
            "C" => ("c@x.com", "gamma"),
            other => panic!("unexpected subject {}", other),
        };
        assert_eq!((message.recipient(), message.content()), expected);
    }
}

#[tokio::test]
async fn test_concurrent_pool_delivers_everything() {
    let mut config = memory_config();
    config.drainer.max_concurrent_deliveries = 3;
    let (relay, broker, transport) = memory_relay(&config);
    transport.set_delay(Duration::from_millis(20));

    for i in 0..9 {
        relay
            .producer
            .enqueue(format!("Message {}", i), "a@x.com", "x")
            .await
            .unwrap();
    }

    let report = relay.drainer.drain().await.unwrap();
    assert_eq!(report.delivered, 9);
    assert_eq!(broker.ready_count(QUEUE), 0);
    assert_eq!(broker.unacked_count(QUEUE), 0);
}

#[tokio::test]
async fn test_overlapping_drain_is_rejected() {
    let (relay, _broker, transport) = memory_relay(&memory_config());
    transport.set_delay(Duration::from_millis(300));
    relay.producer.enqueue("Slow", "a@x.com", "x").await.unwrap();

    let drainer = Arc::clone(&relay.drainer);
    let first = tokio::spawn(async move { drainer.drain().await });

    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = relay.drainer.drain().await;
    assert!(matches!(second, Err(DrainError::ConcurrentDrainConflict)));

    let report = first.await.unwrap().unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(relay.drainer.state(), DrainState::Idle);
}

#[tokio::test]
async fn test_broker_unavailable_fails_drain_without_loss() {
    let (relay, broker, transport) = memory_relay(&memory_config());
    relay.producer.enqueue("Kept", "a@x.com", "x").await.unwrap();

    broker.set_available(false);
    let result = relay.drainer.drain().await;
    assert!(matches!(result, Err(DrainError::Connect(_))));
    assert!(transport.attempts().is_empty());
    assert_eq!(relay.drainer.state(), DrainState::Idle);

    broker.set_available(true);
    assert_eq!(broker.ready_count(QUEUE), 1);
    let report = relay.drainer.drain().await.unwrap();
    assert_eq!(report.delivered, 1);
}

#[tokio::test]
async fn test_broker_lost_mid_drain_fails_drain_and_keeps_messages() {
    let (relay, broker, transport) = memory_relay(&memory_config());
    for subject in ["One", "Two", "Three"] {
        relay.producer.enqueue(subject, "a@x.com", "x").await.unwrap();
    }
    transport.cut_broker_on_send(&broker);

    let report = match relay.drainer.drain().await {
        Err(DrainError::Interrupted { report, .. }) => report,
        other => panic!("expected an interrupted drain, got {:?}", other),
    };
    assert_eq!(report.received, 1);
    assert_eq!(report.ack_failures, 1);
    assert_eq!(report.delivered, 0);
    assert!(report.session_error.is_some());
    assert_eq!(relay.drainer.state(), DrainState::Idle);

    broker.set_available(true);
    assert_eq!(broker.ready_count(QUEUE), 3);
    assert_eq!(broker.unacked_count(QUEUE), 0);

    let retry = relay.drainer.drain().await.unwrap();
    assert_eq!(retry.delivered, 3);
    assert_eq!(
        transport.delivered_subjects(),
        vec!["One", "One", "Two", "Three"]
    );
}

#[tokio::test]
async fn test_queue_declared_with_conflicting_properties() {
    let (relay, broker, _transport) = memory_relay(&memory_config());

    broker
        .declare_queue(
            QUEUE,
            QueueProperties {
                durable: false,
                ..QueueProperties::durable()
            },
        )
        .await
        .unwrap();

    let enqueue = relay.producer.enqueue("Welcome", "a@x.com", "Hi").await;
    assert!(enqueue.is_err());
    assert!(matches!(
        relay.drainer.drain().await,
        Err(DrainError::Connect(_))
    ));
}

#[tokio::test]
async fn test_ensure_queue_is_idempotent() {
    let (relay, broker, _transport) = memory_relay(&memory_config());

    relay.client.ensure_queue(QUEUE).await.unwrap();
    relay.producer.enqueue("One", "a@x.com", "x").await.unwrap();
    relay.client.ensure_queue(QUEUE).await.unwrap();

    assert_eq!(broker.ready_count(QUEUE), 1);
}

#[tokio::test]
async fn test_producer_is_safe_to_share() {
    let (relay, broker, _transport) = memory_relay(&memory_config());

    let mut handles = Vec::new();
    for i in 0..10 {
        let producer = relay.producer.clone();
        handles.push(tokio::spawn(async move {
            producer
                .enqueue(format!("Parallel {}", i), "a@x.com", "x")
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(broker.ready_count(QUEUE), 10);
}

#[tokio::test]
async fn test_codec_round_trip_through_queue() {
    let (relay, broker, _transport) = memory_relay(&memory_config());
    let message = NotificationMessage::new("Grüße 👋", "a@x.com", "<p>é</p>").unwrap();

    relay.producer.enqueue_message(&message).await.unwrap();

    let payloads = broker.ready_payloads(QUEUE);
    assert_eq!(codec::decode(&payloads[0]).unwrap(), message);
}
