//! In-memory event bus with durable consumer groups.
//!
//! Each consumer group owns one queue that outlives its subscribers: messages
//! published while nobody is subscribed wait for the next subscriber, and a
//! `nak` puts the message back after the configured redelivery delay with its
//! attempt number bumped. Only one subscriber per group receives at a time; a
//! second `subscribe` on the same group waits until the first stream is dropped.
//!
//! Groups start receiving from the moment they are declared, either by
//! [`InMemoryEventBus::declare`] or by their first `subscribe`.

use async_stream::stream;
use lending_core::event::topic_matches;
use lending_core::event_bus::{
    Delivery, DeliveryStream, EventBus, EventBusError, Settlement, Subscription,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Clone, Debug)]
struct Envelope {
    topic: String,
    payload: Vec<u8>,
    attempt: u32,
}

struct GroupQueue {
    topics: Vec<String>,
    tx: mpsc::UnboundedSender<Envelope>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>>,
}

impl GroupQueue {
    fn new(topics: Vec<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            topics,
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }

    fn wants(&self, topic: &str) -> bool {
        self.topics.iter().any(|pattern| topic_matches(pattern, topic))
    }
}

/// A settlement observed by the bus, for assertions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettledMessage {
    /// Group that settled
    pub consumer_group: String,
    /// Topic of the message
    pub topic: String,
    /// Delivery attempt that was settled
    pub attempt: u32,
    /// Outcome
    pub settlement: Settlement,
}

#[derive(Default)]
struct Inner {
    groups: HashMap<String, GroupQueue>,
    published: Vec<(String, Vec<u8>)>,
    settled: Vec<SettledMessage>,
    unavailable: bool,
    stalled: bool,
}

/// In-memory [`EventBus`] for tests.
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<Mutex<Inner>>,
    redelivery_delay: Duration,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    /// Create a bus that redelivers nak'd messages after 10 ms.
    #[must_use]
    pub fn new() -> Self {
        Self::with_redelivery_delay(Duration::from_millis(10))
    }

    /// Create a bus with a custom redelivery delay.
    #[must_use]
    pub fn with_redelivery_delay(redelivery_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            redelivery_delay,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the group's queue now so it retains messages published before its
    /// first subscriber arrives.
    pub fn declare(&self, subscription: &Subscription) {
        self.lock()
            .groups
            .entry(subscription.consumer_group.clone())
            .or_insert_with(|| GroupQueue::new(subscription.topics.clone()));
    }

    /// Make every publish fail with [`EventBusError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Make every publish hang forever, as a broker that accepts the connection
    /// but never acknowledges.
    pub fn set_stalled(&self, stalled: bool) {
        self.lock().stalled = stalled;
    }

    /// Inject a raw payload, bypassing publish bookkeeping and failure switches.
    pub fn inject(&self, topic: &str, payload: &[u8]) {
        let inner = self.lock();
        for group in inner.groups.values().filter(|g| g.wants(topic)) {
            let _ = group.tx.send(Envelope {
                topic: topic.to_string(),
                payload: payload.to_vec(),
                attempt: 1,
            });
        }
    }

    /// Every successfully published `(topic, payload)`, in order.
    #[must_use]
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().published.clone()
    }

    /// Payloads published to `topic`, in order.
    #[must_use]
    pub fn published_on(&self, topic: &str) -> Vec<Vec<u8>> {
        self.lock()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Every settlement observed so far, in order.
    #[must_use]
    pub fn settlements(&self) -> Vec<SettledMessage> {
        self.lock().settled.clone()
    }

    fn record(&self, group: &str, envelope: &Envelope, settlement: Settlement) {
        self.lock().settled.push(SettledMessage {
            consumer_group: group.to_string(),
            topic: envelope.topic.clone(),
            attempt: envelope.attempt,
            settlement,
        });
    }

    fn forward(
        &self,
        group: String,
        tx: mpsc::UnboundedSender<Envelope>,
        rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>>,
        out: mpsc::Sender<Result<Delivery, EventBusError>>,
    ) {
        let bus = self.clone();
        tokio::spawn(async move {
            let mut rx = rx.lock_owned().await;
            loop {
                let envelope = tokio::select! {
                    () = out.closed() => break,
                    next = rx.recv() => match next {
                        Some(envelope) => envelope,
                        None => break,
                    },
                };

                let (delivery, decision) =
                    Delivery::new(envelope.topic.clone(), envelope.payload.clone(), envelope.attempt);
                if out.send(Ok(delivery)).await.is_err() {
                    // Never reached a subscriber; keep it for the next one.
                    let _ = tx.send(envelope);
                    break;
                }

                let settlement = decision.await.unwrap_or(Settlement::Nak);
                bus.record(&group, &envelope, settlement);

                if settlement == Settlement::Nak {
                    let tx = tx.clone();
                    let delay = bus.redelivery_delay;
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Envelope {
                            attempt: envelope.attempt + 1,
                            ..envelope
                        });
                    });
                }
            }
        });
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let payload = payload.to_vec();
        Box::pin(async move {
            let stalled = {
                let mut inner = self.lock();
                if inner.unavailable {
                    return Err(EventBusError::Unavailable("in-memory bus switched off".into()));
                }
                if !inner.stalled {
                    for group in inner.groups.values().filter(|g| g.wants(&topic)) {
                        let _ = group.tx.send(Envelope {
                            topic: topic.clone(),
                            payload: payload.clone(),
                            attempt: 1,
                        });
                    }
                    inner.published.push((topic, payload));
                }
                inner.stalled
            };
            if stalled {
                futures::future::pending::<()>().await;
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        subscription: &Subscription,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryStream, EventBusError>> + Send + '_>> {
        let subscription = subscription.clone();
        Box::pin(async move {
            if subscription.topics.is_empty() {
                return Err(EventBusError::SubscriptionFailed {
                    topics: Vec::new(),
                    reason: "no topics".into(),
                });
            }

            let (tx, rx) = {
                let mut inner = self.lock();
                let group = inner
                    .groups
                    .entry(subscription.consumer_group.clone())
                    .or_insert_with(|| GroupQueue::new(subscription.topics.clone()));
                group.topics.clone_from(&subscription.topics);
                (group.tx.clone(), Arc::clone(&group.rx))
            };

            let (out_tx, mut out_rx) = mpsc::channel(1);
            self.forward(subscription.consumer_group, tx, rx, out_tx);

            let deliveries = stream! {
                while let Some(item) = out_rx.recv().await {
                    yield item;
                }
            };
            Ok(Box::pin(deliveries) as DeliveryStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn counter_group() -> Subscription {
        Subscription::new("counter", ["book.borrowed", "book.returned"])
    }

    #[tokio::test]
    async fn each_group_gets_its_own_copy() {
        let bus = InMemoryEventBus::new();
        let mut counter = bus.subscribe(&counter_group()).await.unwrap();
        let mut hub = bus.subscribe(&Subscription::new("hub", ["book.*"])).await.unwrap();

        bus.publish("book.borrowed", b"one").await.unwrap();

        let a = counter.next().await.unwrap().unwrap();
        let b = hub.next().await.unwrap().unwrap();
        assert_eq!(a.payload(), b"one");
        assert_eq!(b.payload(), b"one");
        a.ack();
        b.ack();
    }

    #[tokio::test]
    async fn stats_topic_only_reaches_wildcard_groups() {
        let bus = InMemoryEventBus::new();
        bus.declare(&counter_group());
        let mut hub = bus.subscribe(&Subscription::new("hub", ["book.*"])).await.unwrap();

        bus.publish("book.stats", b"{}").await.unwrap();
        let delivery = hub.next().await.unwrap().unwrap();
        assert_eq!(delivery.topic(), "book.stats");
        delivery.ack();

        let mut counter = bus.subscribe(&counter_group()).await.unwrap();
        let nothing = tokio::time::timeout(Duration::from_millis(50), counter.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn nak_redelivers_with_next_attempt() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&counter_group()).await.unwrap();
        bus.publish("book.borrowed", b"x").await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.attempt(), 1);
        first.nak();

        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.attempt(), 2);
        second.ack();

        let settled: Vec<_> = bus.settlements().into_iter().map(|s| s.settlement).collect();
        assert_eq!(settled, vec![Settlement::Nak, Settlement::Ack]);
    }

    #[tokio::test]
    async fn term_is_not_redelivered() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&counter_group()).await.unwrap();
        bus.publish("book.returned", b"bad").await.unwrap();
        bus.publish("book.returned", b"good").await.unwrap();

        stream.next().await.unwrap().unwrap().term();
        let next = stream.next().await.unwrap().unwrap();
        assert_eq!(next.payload(), b"good");
        next.ack();
    }

    #[tokio::test]
    async fn unsettled_message_survives_resubscribe() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&counter_group()).await.unwrap();
        bus.publish("book.borrowed", b"keep").await.unwrap();

        let delivery = stream.next().await.unwrap().unwrap();
        drop(delivery);
        drop(stream);

        let mut again = bus.subscribe(&counter_group()).await.unwrap();
        let redelivered = again.next().await.unwrap().unwrap();
        assert_eq!(redelivered.payload(), b"keep");
        assert!(redelivered.is_redelivery());
        redelivered.ack();
    }

    #[tokio::test]
    async fn unavailable_bus_rejects_publish() {
        let bus = InMemoryEventBus::new();
        bus.set_unavailable(true);
        let result = bus.publish("book.borrowed", b"x").await;
        assert!(matches!(result, Err(EventBusError::Unavailable(_))));
        assert!(bus.published().is_empty());
    }
}
