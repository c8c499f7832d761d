//! Durable counter worker.
//!
//! Consumes borrow and return events from a durable consumer group and records
//! each in the consumption log. The first delivery of a borrow increments the
//! item's popularity; redeliveries are logged but change nothing else.
//!
//! ```text
//! Received ─► Parsed ─► Applied ─► ack
//!    │           └────► Apply-Failed ─► nak (redelivered later)
//!    └─► Parse-Failed ─► dead letter + term (never redelivered)
//! ```

use async_trait::async_trait;
use lending_core::environment::Clock;
use lending_core::event::{LifecycleEvent, Topics};
use lending_core::event_bus::{Delivery, Subscription};
use lending_core::store::{ApplyOutcome, ConsumptionStore, DeadLetterSink, NewConsumptionEntry};
use std::sync::Arc;

use crate::consumer::DeliveryHandler;
use crate::metrics::{WORKER_DUPLICATES, WORKER_MESSAGES};

/// Default durable consumer group
pub const DEFAULT_GROUP: &str = "popularity-counter";

/// What the worker did with a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// State updated, acked
    Applied,
    /// Already applied earlier; logged and acked
    Duplicate,
    /// Store failed; nak'd for redelivery
    Retry,
    /// Unparseable; terminated
    Terminated,
}

/// Applies lifecycle events to the consumption store.
pub struct CounterWorker {
    store: Arc<dyn ConsumptionStore>,
    dead_letters: Option<Arc<dyn DeadLetterSink>>,
    clock: Arc<dyn Clock>,
}

impl CounterWorker {
    /// Create a worker without a dead-letter sink (terminated messages are only logged).
    #[must_use]
    pub fn new(store: Arc<dyn ConsumptionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            dead_letters: None,
            clock,
        }
    }

    /// Record terminated messages in `sink`.
    #[must_use]
    pub fn with_dead_letters(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    /// Subscription for `group` on the borrow and return topics.
    #[must_use]
    pub fn subscription(group: &str) -> Subscription {
        Subscription::new(group, Topics::lifecycle())
    }

    /// Process and settle one delivery.
    pub async fn handle(&self, delivery: Delivery) -> Disposition {
        let event = match LifecycleEvent::decode_from(delivery.topic(), delivery.payload()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    topic = delivery.topic(),
                    attempt = delivery.attempt(),
                    error = %e,
                    "Terminating unparseable message"
                );
                if let Some(sink) = &self.dead_letters {
                    if let Err(err) = sink.record(delivery.topic(), delivery.payload(), &e.to_string()).await {
                        tracing::error!(error = %err, "Failed to record dead letter");
                    }
                }
                delivery.term();
                metrics::counter!(WORKER_MESSAGES, "outcome" => "term").increment(1);
                return Disposition::Terminated;
            },
        };

        let entry = NewConsumptionEntry {
            loan_id: event.loan_id,
            item_id: event.item_id,
            borrower_id: event.borrower_id,
            action: event.action,
            received_at: self.clock.now(),
        };

        match self.store.apply(entry).await {
            Ok(outcome) => {
                delivery.ack();
                metrics::counter!(WORKER_MESSAGES, "outcome" => "ack").increment(1);
                if outcome == ApplyOutcome::AlreadyApplied {
                    metrics::counter!(WORKER_DUPLICATES).increment(1);
                    tracing::info!(loan_id = %event.loan_id, action = %event.action, "Event already applied");
                    Disposition::Duplicate
                } else {
                    tracing::debug!(loan_id = %event.loan_id, action = %event.action, "Event applied");
                    Disposition::Applied
                }
            },
            Err(e) => {
                tracing::warn!(
                    loan_id = %event.loan_id,
                    attempt = delivery.attempt(),
                    transient = e.is_transient(),
                    error = %e,
                    "Apply failed; requesting redelivery"
                );
                delivery.nak();
                metrics::counter!(WORKER_MESSAGES, "outcome" => "nak").increment(1);
                Disposition::Retry
            },
        }
    }
}

#[async_trait]
impl DeliveryHandler for CounterWorker {
    async fn on_delivery(&self, delivery: Delivery) {
        self.handle(delivery).await;
    }
}
