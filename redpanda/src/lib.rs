//! Redpanda event bus for the lending engine.
//!
//! Implements [`EventBus`] from `lending-core` on top of rdkafka, so it works
//! against Redpanda or any Kafka-compatible broker.
//!
//! # Delivery Semantics
//!
//! Consumer groups give each subscriber a durable position. Offsets are committed
//! manually, one message at a time, only once the subscriber has settled it:
//!
//! ```text
//!  poll ──► Delivery ──► subscriber
//!                           │
//!             ┌─────────────┼──────────────┐
//!            ack           nak            term
//!             │             │               │
//!          commit    wait, redeliver     commit
//!                    (attempt + 1)
//! ```
//!
//! A message the subscriber never settles counts as `nak`. If the subscriber
//! goes away mid-message, the consumer stops without committing and the group
//! sees the message again after rebalancing.
//!
//! Kafka has no per-message negative acknowledgement, so `nak` is handled here:
//! the consumer task holds the partition position and redelivers the same
//! message after the configured delay. With [`max_deliveries`] set, a message
//! that reaches the limit is committed and logged instead of redelivered again.
//!
//! [`max_deliveries`]: RedpandaEventBusBuilder::max_deliveries
//!
//! # Topic patterns
//!
//! A subscription topic ending in `.*` (for example `book.*`) becomes a Kafka
//! regex subscription matching every topic under that prefix.
//!
//! # Example
//!
//! ```no_run
//! use lending_redpanda::RedpandaEventBus;
//! use lending_core::event_bus::{EventBus, Subscription};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::new("localhost:9092")?;
//!
//! event_bus.publish("book.borrowed", br#"{"book_id":1}"#).await?;
//!
//! let subscription = Subscription::new("popularity-counter", ["book.borrowed", "book.returned"]);
//! let mut stream = event_bus.subscribe(&subscription).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(delivery) => delivery.ack(),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use lending_core::event_bus::{
    Delivery, DeliveryStream, EventBus, EventBusError, Settlement, Subscription,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default wait before a nak'd message is redelivered
pub const DEFAULT_REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// Where a consumer group without committed offsets starts. Durable groups must
/// not skip messages published before their first commit.
pub const DEFAULT_AUTO_OFFSET_RESET: &str = "earliest";

/// Redpanda event bus implementation.
///
/// # Example
///
/// ```no_run
/// use lending_redpanda::RedpandaEventBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .redelivery_delay(Duration::from_millis(500))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    /// Kafka producer for publishing
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer timeout
    timeout: Duration,
    /// Delivery buffer size for subscribers
    buffer_size: usize,
    /// Auto offset reset policy for new groups
    auto_offset_reset: String,
    /// Wait before redelivering a nak'd message
    redelivery_delay: Duration,
    /// Deliveries after which a message is committed anyway
    max_deliveries: Option<u32>,
}

impl RedpandaEventBus {
    /// Create a new Redpanda event bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
    redelivery_delay: Option<Duration>,
    max_deliveries: Option<u32>,
}

impl RedpandaEventBusBuilder {
    /// Comma-separated broker addresses (e.g. `"localhost:9092"`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Deliveries buffered between the Kafka consumer and the subscriber.
    ///
    /// Default: 1. Settlement is sequential, so a larger buffer only helps
    /// subscribers that settle out of band. Zero is treated as 1.
    #[must_use]
    pub const fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Where a new consumer group starts: `"earliest"` or `"latest"`.
    ///
    /// Default: [`DEFAULT_AUTO_OFFSET_RESET`]. Set `"latest"` only for groups
    /// that may miss history, such as a live relay.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Wait before a nak'd message is delivered again.
    ///
    /// Default: [`DEFAULT_REDELIVERY_DELAY`]
    #[must_use]
    pub const fn redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = Some(delay);
        self
    }

    /// Give up on a message after this many deliveries. Unlimited by default.
    #[must_use]
    pub const fn max_deliveries(mut self, max: u32) -> Self {
        self.max_deliveries = Some(max);
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if brokers are not set or the
    /// producer cannot be created.
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self
            .brokers
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| EventBusError::ConnectionFailed("Brokers not configured".to_string()))?;
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));
        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| EventBusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        let buffer_size = self.buffer_size.unwrap_or(1).max(1);
        let auto_offset_reset = self.auto_offset_reset.unwrap_or_else(|| DEFAULT_AUTO_OFFSET_RESET.to_string());
        let redelivery_delay = self.redelivery_delay.unwrap_or(DEFAULT_REDELIVERY_DELAY);

        tracing::info!(
            brokers = %brokers,
            acks = acks,
            compression = compression,
            buffer_size = buffer_size,
            auto_offset_reset = %auto_offset_reset,
            redelivery_delay_ms = u64::try_from(redelivery_delay.as_millis()).unwrap_or(u64::MAX),
            max_deliveries = ?self.max_deliveries,
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            buffer_size,
            auto_offset_reset,
            redelivery_delay,
            max_deliveries: self.max_deliveries,
        })
    }
}

/// Kafka subscription string for a topic or `prefix.*` pattern.
///
/// Patterns become anchored regexes (librdkafka treats a leading `^` as regex).
#[must_use]
pub fn kafka_topic(pattern: &str) -> String {
    match pattern.strip_suffix(".*") {
        Some(prefix) => format!("^{}\\..+", regex_escape(prefix)),
        None => pattern.to_string(),
    }
}

fn regex_escape(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for c in literal.chars() {
        if "\\.+*?()|[]{}^$".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        // Clone data before moving into async block
        let topic = topic.to_string();
        let payload = payload.to_vec();
        let timeout = self.timeout;

        Box::pin(async move {
            let record = FutureRecord::<(), [u8]>::to(&topic).payload(payload.as_slice());

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition = partition,
                        offset = offset,
                        "Message published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "Failed to publish message");
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(
        &self,
        subscription: &Subscription,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>> {
        // Clone configuration before moving into async block
        let subscription = subscription.clone();
        let brokers = self.brokers.clone();
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();
        let settle = SettleConfig {
            redelivery_delay: self.redelivery_delay,
            max_deliveries: self.max_deliveries,
        };

        Box::pin(async move {
            let topics = subscription.topics.clone();
            if topics.is_empty() {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "No topics given".to_string(),
                });
            }

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &subscription.consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let kafka_topics: Vec<String> = topics.iter().map(|t| kafka_topic(t)).collect();
            let topic_refs: Vec<&str> = kafka_topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?kafka_topics,
                consumer_group = %subscription.consumer_group,
                auto_offset_reset = %auto_offset_reset,
                manual_commit = true,
                "Subscribed to topics"
            );

            let (tx, rx) = mpsc::channel(buffer_size);
            let group = subscription.consumer_group.clone();
            tokio::spawn(async move {
                run_consumer(&consumer, &tx, settle).await;
                tracing::debug!(consumer_group = %group, "Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}

#[derive(Clone, Copy)]
struct SettleConfig {
    redelivery_delay: Duration,
    max_deliveries: Option<u32>,
}

type DeliverySender = mpsc::Sender<Result<Delivery, EventBusError>>;

async fn run_consumer(consumer: &StreamConsumer, tx: &DeliverySender, settle: SettleConfig) {
    use futures::StreamExt;

    let mut stream = consumer.stream();
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(message) => {
                if !deliver_until_settled(&message, tx, settle).await {
                    // Subscriber gone; leave the offset uncommitted.
                    break;
                }
                if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                    tracing::warn!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        error = %e,
                        "Failed to commit offset (message may be redelivered)"
                    );
                }
            },
            Err(e) => {
                let err = EventBusError::TransportError(format!("Failed to receive message: {e}"));
                if tx.send(Err(err)).await.is_err() {
                    break;
                }
            },
        }
    }
}

/// Hand `message` to the subscriber until it is acked or terminated.
///
/// Returns `false` if the subscriber went away before settling.
async fn deliver_until_settled(message: &BorrowedMessage<'_>, tx: &DeliverySender, settle: SettleConfig) -> bool {
    let topic = message.topic().to_string();
    let payload = message.payload().unwrap_or_default().to_vec();
    let mut attempt = 1_u32;

    loop {
        let (delivery, decision) = Delivery::new(topic.clone(), payload.clone(), attempt);
        if tx.send(Ok(delivery)).await.is_err() {
            return false;
        }

        match decision.await.unwrap_or(Settlement::Nak) {
            Settlement::Ack => return true,
            Settlement::Term => {
                tracing::debug!(
                    topic = %topic,
                    offset = message.offset(),
                    attempt = attempt,
                    "Message terminated"
                );
                return true;
            },
            Settlement::Nak => {
                if settle.max_deliveries.is_some_and(|max| attempt >= max) {
                    tracing::error!(
                        topic = %topic,
                        partition = message.partition(),
                        offset = message.offset(),
                        attempt = attempt,
                        "Delivery limit reached; skipping message"
                    );
                    return true;
                }
                tokio::select! {
                    () = tokio::time::sleep(settle.redelivery_delay) => {},
                    () = tx.closed() => return false,
                }
                attempt += 1;
            },
        }
    }
}
