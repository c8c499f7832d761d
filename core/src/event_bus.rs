//! Event bus abstraction with manual settlement.
//!
//! Lifecycle events leave the API process through [`EventBus::publish`] and reach
//! consumers through [`EventBus::subscribe`]. Every [`Delivery`] must be settled
//! exactly once:
//!
//! ```text
//!                 ┌──► ack()  ── position advances, never redelivered
//! Delivery ───────┼──► nak()  ── redelivered later (attempt + 1)
//!                 └──► term() ── position advances, never redelivered, logged as dead
//! ```
//!
//! A delivery dropped without settlement counts as `nak`, so a consumer task that
//! panics or is cancelled mid-message loses nothing.
//!
//! # Consumer Groups
//!
//! A [`Subscription`] names a durable consumer group. Each group receives its own
//! copy of every message on its topics, and its position survives restarts.
//! The counter worker and the live hub use distinct groups, so both see every event.
//!
//! # Implementations
//!
//! - `InMemoryEventBus` in `lending-testing`: in-process, with redelivery
//! - `RedpandaEventBus` in `lending-redpanda`: Kafka-compatible production transport

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the broker
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a payload to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// The broker did not acknowledge a publish in time
    #[error("Publish to topic '{topic}' timed out after {timeout_ms} ms")]
    Timeout {
        /// The topic
        topic: String,
        /// Bound that elapsed
        timeout_ms: u64,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Topic or pattern not usable
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    /// Consumer group error
    #[error("Consumer group error: {0}")]
    ConsumerGroupError(String),

    /// The broker is unreachable
    #[error("Event bus unavailable: {0}")]
    Unavailable(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// How a delivery was settled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Settlement {
    /// Processed; advance past it
    Ack,
    /// Failed transiently; redeliver later
    Nak,
    /// Permanently unprocessable; advance past it without redelivery
    Term,
}

/// A durable subscription request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    /// Durable consumer group name
    pub consumer_group: String,
    /// Topics or wildcard patterns (`book.*`)
    pub topics: Vec<String>,
}

impl Subscription {
    /// Subscribe `consumer_group` to `topics`.
    #[must_use]
    pub fn new(consumer_group: impl Into<String>, topics: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            consumer_group: consumer_group.into(),
            topics: topics.into_iter().map(Into::into).collect(),
        }
    }
}

/// A message handed to a subscriber, awaiting settlement.
#[derive(Debug)]
pub struct Delivery {
    topic: String,
    payload: Vec<u8>,
    attempt: u32,
    settle: Option<oneshot::Sender<Settlement>>,
}

impl Delivery {
    /// Create a delivery and the receiver on which the transport learns its fate.
    ///
    /// `attempt` starts at 1 for the first delivery of a message.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        payload: Vec<u8>,
        attempt: u32,
    ) -> (Self, oneshot::Receiver<Settlement>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                topic: topic.into(),
                payload,
                attempt,
                settle: Some(tx),
            },
            rx,
        )
    }

    /// Topic the message arrived on
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Raw payload
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Delivery attempt, starting at 1
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether the broker has delivered this message before.
    #[must_use]
    pub const fn is_redelivery(&self) -> bool {
        self.attempt > 1
    }

    /// Acknowledge successful processing.
    pub fn ack(mut self) {
        self.settle(Settlement::Ack);
    }

    /// Request redelivery.
    pub fn nak(mut self) {
        self.settle(Settlement::Nak);
    }

    /// Drop permanently without redelivery.
    pub fn term(mut self) {
        self.settle(Settlement::Term);
    }

    fn settle(&mut self, settlement: Settlement) {
        if let Some(tx) = self.settle.take() {
            // The transport may already be gone; the broker then redelivers on its own.
            let _ = tx.send(settlement);
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        self.settle(Settlement::Nak);
    }
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Publish/subscribe transport.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be shared as `Arc<dyn EventBus>` between the publisher, the worker
/// and the hub relay.
pub trait EventBus: Send + Sync {
    /// Publish a payload to a concrete topic.
    ///
    /// Resolves once the broker has accepted the message.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] or [`EventBusError::Unavailable`]
    /// if the broker rejects or cannot be reached.
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Join a durable consumer group and receive deliveries for its topics.
    ///
    /// Delivery resumes from the group's last settled position.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription cannot be
    /// established.
    fn subscribe(
        &self,
        subscription: &Subscription,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn settlement_reaches_the_transport() {
        let (delivery, rx) = Delivery::new("book.borrowed", b"{}".to_vec(), 1);
        delivery.term();
        assert_eq!(rx.await.unwrap(), Settlement::Term);
    }

    #[tokio::test]
    async fn dropped_delivery_is_a_nak() {
        let (delivery, rx) = Delivery::new("book.borrowed", Vec::new(), 2);
        assert!(delivery.is_redelivery());
        drop(delivery);
        assert_eq!(rx.await.unwrap(), Settlement::Nak);
    }

    #[test]
    fn event_bus_is_dyn_compatible() {
        fn assert_object(_: Option<&dyn EventBus>) {}
        assert_object(None);
    }
}
