//! Event publisher.
//!
//! Fire-and-forget delivery of lifecycle events to the broker. Each publish is
//! bounded by a timeout; failures are logged and counted, never returned to the
//! request that caused the event, and never roll anything back.
//!
//! After the lifecycle event, the same detached task publishes a loan statistics
//! snapshot to [`Topics::STATS`] for live viewers.

use lending_core::environment::Clock;
use lending_core::event::{LifecycleEvent, StatsUpdate, Topics};
use lending_core::event_bus::{EventBus, EventBusError};
use lending_core::store::InventoryStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::metrics::{PUBLISH_FAILED, PUBLISH_SUCCEEDED};

/// Default bound on a single publish
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_millis(500);

/// Publishes lifecycle events and stats snapshots.
#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    clock: Arc<dyn Clock>,
    stats_source: Option<Arc<dyn InventoryStore>>,
    timeout: Duration,
}

impl EventPublisher {
    /// Create a publisher with the default 500 ms bound and no stats snapshots.
    #[must_use]
    pub fn new(bus: Arc<dyn EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            bus,
            clock,
            stats_source: None,
            timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    /// Override the publish bound.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Publish a stats snapshot read from `store` after every lifecycle event.
    #[must_use]
    pub fn with_stats_from(mut self, store: Arc<dyn InventoryStore>) -> Self {
        self.stats_source = Some(store);
        self
    }

    /// Publish `event` to its topic, waiting at most the configured bound.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::Timeout`] if the broker does not acknowledge in
    /// time, or the bus error if it rejects the publish.
    pub async fn publish(&self, event: &LifecycleEvent) -> Result<(), EventBusError> {
        self.publish_bounded(event.topic(), &event.encode()).await
    }

    /// Publish `event` (then a stats snapshot) on a task detached from the caller.
    ///
    /// Awaiting the handle is optional; dropping it leaves the task running.
    pub fn publish_detached(&self, event: LifecycleEvent) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.publish(&event).await {
                tracing::warn!(
                    topic = event.topic(),
                    loan_id = %event.loan_id,
                    error = %e,
                    "Lifecycle event not published; state change already committed"
                );
            }
            this.publish_stats().await;
        })
    }

    async fn publish_stats(&self) {
        let Some(store) = &self.stats_source else {
            return;
        };
        let stats = match store.loan_stats().await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(error = %e, "Loan stats unavailable; snapshot skipped");
                return;
            },
        };
        let update = StatsUpdate::new(stats, self.clock.now());
        if let Err(e) = self.publish_bounded(Topics::STATS, &update.encode()).await {
            tracing::warn!(error = %e, "Stats snapshot not published");
        }
    }

    async fn publish_bounded(&self, topic: &'static str, payload: &[u8]) -> Result<(), EventBusError> {
        let result = match tokio::time::timeout(self.timeout, self.bus.publish(topic, payload)).await {
            Ok(result) => result,
            Err(_) => Err(EventBusError::Timeout {
                topic: topic.to_string(),
                timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match &result {
            Ok(()) => metrics::counter!(PUBLISH_SUCCEEDED, "topic" => topic).increment(1),
            Err(_) => metrics::counter!(PUBLISH_FAILED, "topic" => topic).increment(1),
        }
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use lending_core::types::{BorrowerId, ItemId, LoanId};
    use lending_testing::{InMemoryEventBus, InMemoryInventoryStore, test_clock};

    fn event() -> LifecycleEvent {
        LifecycleEvent::borrowed(ItemId::new(1), BorrowerId::new(7), LoanId::new(3), test_clock().now())
    }

    #[tokio::test]
    async fn publishes_flat_payload_to_action_topic() {
        let bus = InMemoryEventBus::new();
        let publisher = EventPublisher::new(Arc::new(bus.clone()), Arc::new(test_clock()));

        publisher.publish(&event()).await.unwrap();

        let sent = bus.published_on(Topics::BORROWED);
        assert_eq!(sent.len(), 1);
        assert_eq!(LifecycleEvent::decode(&sent[0]).unwrap(), event());
    }

    #[tokio::test]
    async fn stalled_broker_times_out() {
        let bus = InMemoryEventBus::new();
        bus.set_stalled(true);
        let publisher = EventPublisher::new(Arc::new(bus), Arc::new(test_clock()))
            .with_timeout(Duration::from_millis(20));

        let err = publisher.publish(&event()).await.unwrap_err();
        assert!(matches!(err, EventBusError::Timeout { timeout_ms: 20, .. }));
    }

    #[tokio::test]
    async fn detached_publish_swallows_failures() {
        let bus = InMemoryEventBus::new();
        bus.set_unavailable(true);
        let publisher = EventPublisher::new(Arc::new(bus.clone()), Arc::new(test_clock()));

        publisher.publish_detached(event()).await.unwrap();
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn detached_publish_follows_with_stats_snapshot() {
        let bus = InMemoryEventBus::new();
        let store = InMemoryInventoryStore::default();
        let publisher = EventPublisher::new(Arc::new(bus.clone()), Arc::new(test_clock()))
            .with_stats_from(Arc::new(store));

        publisher.publish_detached(event()).await.unwrap();

        let topics: Vec<String> = bus.published().into_iter().map(|(t, _)| t).collect();
        assert_eq!(topics, vec![Topics::BORROWED.to_string(), Topics::STATS.to_string()]);
        let stats: StatsUpdate = serde_json::from_slice(&bus.published_on(Topics::STATS)[0]).unwrap();
        assert_eq!(stats.kind, "STATS_UPDATE");
    }
}
