//! Integration tests for [`RedpandaEventBus`] with a real Kafka-compatible broker.
//!
//! These tests are marked as `#[ignore]` by default because they need Docker and
//! take 15-60 seconds each to start the broker. To run explicitly:
//!
//! ```bash
//! cargo test -p lending-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use futures::StreamExt;
use lending_core::event_bus::{EventBus, Subscription};
use lending_redpanda::RedpandaEventBus;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

async fn start_broker() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");
    wait_for_broker(&brokers).await;
    (kafka, brokers)
}

/// Publish until the broker accepts, which also auto-creates the warmup topic.
async fn wait_for_broker(brokers: &str) {
    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        if let Ok(bus) = RedpandaEventBus::new(brokers) {
            if bus.publish("warmup", b"{}").await.is_ok() {
                tokio::time::sleep(Duration::from_millis(500)).await;
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempt != max_attempts, "Broker not ready after {max_attempts} attempts");
    }
}

fn bus(brokers: &str) -> RedpandaEventBus {
    RedpandaEventBus::builder()
        .brokers(brokers)
        .auto_offset_reset("earliest")
        .redelivery_delay(Duration::from_millis(100))
        .build()
        .expect("Failed to create event bus")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn ack_commits_and_group_resumes_after_it() {
    let (_kafka, brokers) = start_broker().await;
    let bus = bus(&brokers);
    let subscription = Subscription::new("resume-test", ["book.borrowed"]);

    bus.publish("book.borrowed", b"first").await.expect("publish first");
    bus.publish("book.borrowed", b"second").await.expect("publish second");

    {
        let mut stream = bus.subscribe(&subscription).await.expect("subscribe");
        let first = tokio::time::timeout(Duration::from_secs(20), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended")
            .expect("delivery");
        assert_eq!(first.payload(), b"first");
        first.ack();
        // Let the async commit reach the broker before leaving the group.
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let mut stream = bus.subscribe(&subscription).await.expect("resubscribe");
    let next = tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .expect("timeout")
        .expect("stream ended")
        .expect("delivery");
    assert_eq!(next.payload(), b"second");
    next.ack();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn nak_redelivers_with_higher_attempt() {
    let (_kafka, brokers) = start_broker().await;
    let bus = bus(&brokers);
    bus.publish("book.returned", b"retry-me").await.expect("publish");

    let mut stream = bus
        .subscribe(&Subscription::new("nak-test", ["book.returned"]))
        .await
        .expect("subscribe");

    let first = tokio::time::timeout(Duration::from_secs(20), stream.next())
        .await
        .expect("timeout")
        .expect("stream ended")
        .expect("delivery");
    assert_eq!(first.attempt(), 1);
    first.nak();

    let second = tokio::time::timeout(Duration::from_secs(5), stream.next())
        .await
        .expect("timeout")
        .expect("stream ended")
        .expect("delivery");
    assert_eq!(second.payload(), b"retry-me");
    assert_eq!(second.attempt(), 2);
    assert!(second.is_redelivery());
    second.term();
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn wildcard_subscription_sees_every_book_topic() {
    let (_kafka, brokers) = start_broker().await;
    let bus = bus(&brokers);
    for topic in ["book.borrowed", "book.returned", "book.stats"] {
        bus.publish(topic, topic.as_bytes()).await.expect("publish");
    }

    let mut stream = bus
        .subscribe(&Subscription::new("wildcard-test", ["book.*"]))
        .await
        .expect("subscribe");

    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(30), async {
        while seen.len() < 3 {
            let delivery = stream.next().await.expect("stream ended").expect("delivery");
            seen.push(delivery.topic().to_string());
            delivery.ack();
        }
    })
    .await
    .expect("timeout waiting for deliveries");

    seen.sort();
    assert_eq!(seen, vec!["book.borrowed", "book.returned", "book.stats"]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn late_group_with_default_offset_reset_sees_earlier_messages() {
    let (_kafka, brokers) = start_broker().await;
    // Production defaults: no explicit offset reset.
    let bus = RedpandaEventBus::new(&brokers).expect("Failed to create event bus");
    bus.publish("book.borrowed", b"before-subscribe").await.expect("publish");

    let mut stream = bus
        .subscribe(&Subscription::new("late-worker-group", ["book.borrowed"]))
        .await
        .expect("subscribe");

    let delivery = tokio::time::timeout(Duration::from_secs(30), stream.next())
        .await
        .expect("earlier message skipped by a new group")
        .expect("stream ended")
        .expect("delivery");
    assert_eq!(delivery.payload(), b"before-subscribe");
    delivery.ack();
}
