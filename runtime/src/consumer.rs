//! Event bus consumer with automatic reconnection.
//!
//! `EventConsumer` owns the subscribe-process-reconnect loop shared by the
//! counter worker and the hub relay. Each of those only implements
//! [`DeliveryHandler`] and must settle every delivery it is handed.
//!
//! ```text
//! loop {
//!     subscribe (durable group)
//!         ok  -> hand each delivery to the handler, one at a time
//!                until the stream ends or errors
//!         err -> log
//!     back off (exponential, reset after a successful subscription)
//! }
//! ```
//!
//! Shutdown is checked both while subscribing and between deliveries. A delivery
//! in flight when shutdown arrives is dropped unsettled, which the transport
//! treats as a nak.

use async_trait::async_trait;
use futures::StreamExt;
use lending_core::event_bus::{Delivery, DeliveryStream, EventBus, Subscription};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::retry::RetryPolicy;

/// Processes one delivery at a time.
///
/// Implementations settle the delivery themselves (`ack`, `nak` or `term`).
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// Handle and settle `delivery`.
    async fn on_delivery(&self, delivery: Delivery);
}

/// Subscribes a [`DeliveryHandler`] to the bus and keeps it subscribed.
pub struct EventConsumer {
    /// Consumer name (for logging)
    name: String,

    /// Durable group and topics
    subscription: Subscription,

    /// Bus to consume from
    event_bus: Arc<dyn EventBus>,

    /// Handler for deliveries
    handler: Arc<dyn DeliveryHandler>,

    /// Shutdown signal receiver
    shutdown: broadcast::Receiver<()>,

    /// Backoff between reconnect attempts; `max_retries` is ignored
    reconnect: RetryPolicy,
}

impl EventConsumer {
    /// Create a consumer with a 100 ms → 30 s reconnect backoff.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        subscription: Subscription,
        event_bus: Arc<dyn EventBus>,
        handler: Arc<dyn DeliveryHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            subscription,
            event_bus,
            handler,
            shutdown,
            reconnect: RetryPolicy::builder().jitter(true).build(),
        }
    }

    /// Override the reconnect backoff.
    #[must_use]
    pub fn with_reconnect_policy(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Spawn the consumer as a background task.
    ///
    /// The task runs until a shutdown signal is received.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(
            consumer = %self.name,
            group = %self.subscription.consumer_group,
            "Event consumer started"
        );
        let mut failures = 0;

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => break,
                subscribed = self.event_bus.subscribe(&self.subscription) => {
                    match subscribed {
                        Ok(stream) => {
                            info!(
                                consumer = %self.name,
                                topics = ?self.subscription.topics,
                                "Subscribed to event bus"
                            );
                            failures = 0;
                            if self.process_stream(stream).await {
                                break;
                            }
                        },
                        Err(e) => {
                            error!(consumer = %self.name, error = %e, "Failed to subscribe to event bus");
                        },
                    }
                }
            }

            let delay = self.reconnect.delay_for_attempt(failures);
            failures += 1;
            warn!(consumer = %self.name, delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), "Reconnecting");
            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(delay) => {},
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    /// Returns `true` if shutdown was requested.
    async fn process_stream(&mut self, mut stream: DeliveryStream) -> bool {
        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    info!(consumer = %self.name, "Shutdown received during processing");
                    return true;
                }
                next = stream.next() => match next {
                    Some(Ok(delivery)) => self.handler.on_delivery(delivery).await,
                    Some(Err(e)) => {
                        error!(consumer = %self.name, error = %e, "Event stream failed");
                        return false;
                    },
                    None => {
                        warn!(consumer = %self.name, "Event stream ended");
                        return false;
                    },
                }
            }
        }
    }
}
