//! Live broadcast hub.
//!
//! A single task owns the set of connected viewers. Everything else talks to it
//! through [`LiveHub`], a cloneable handle that only holds the control-channel
//! sender, so the client set needs no lock:
//!
//! ```text
//!  LiveHub::register ───┐
//!  LiveHub::unregister ─┼──► control loop ──try_send──► client queue ──► write pump
//!  LiveHub::broadcast ──┘   (one at a time)   (bounded)
//! ```
//!
//! A client whose queue is full is disconnected on the spot: its sender is
//! dropped, so the client drains what was already queued and then sees the end
//! of the stream. Nobody else waits for it.
//!
//! [`HubRelay`] feeds the hub from the broker.

use async_trait::async_trait;
use lending_core::event::Topics;
use lending_core::event_bus::{Delivery, Subscription};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::consumer::DeliveryHandler;
use crate::metrics::{HUB_BROADCASTS, HUB_CLIENTS, HUB_EVICTIONS};

/// Default per-client queue capacity
pub const DEFAULT_CLIENT_CAPACITY: usize = 256;
/// Default relay consumer group
pub const DEFAULT_GROUP: &str = "live-broadcast-hub";

/// Identifies a registered client.
pub type ClientId = u64;

/// The hub task has stopped.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("live hub is not running")]
pub struct HubClosed;

/// Hub sizing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HubConfig {
    /// Messages a client may have queued before it is disconnected
    pub client_capacity: usize,
    /// Pending control messages before senders wait
    pub control_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_capacity: DEFAULT_CLIENT_CAPACITY,
            control_capacity: 1024,
        }
    }
}

enum Command {
    Register {
        id: ClientId,
        queue: mpsc::Sender<Arc<str>>,
    },
    Unregister {
        id: ClientId,
    },
    Broadcast {
        payload: Arc<str>,
    },
    ConnectedCount {
        reply: oneshot::Sender<usize>,
    },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register { id, .. } => write!(f, "Register({id})"),
            Self::Unregister { id } => write!(f, "Unregister({id})"),
            Self::Broadcast { payload } => write!(f, "Broadcast({} bytes)", payload.len()),
            Self::ConnectedCount { .. } => f.write_str("ConnectedCount"),
        }
    }
}

/// A registered viewer's end of its queue.
#[derive(Debug)]
pub struct LiveClient {
    id: ClientId,
    queue: mpsc::Receiver<Arc<str>>,
}

impl LiveClient {
    /// This client's id, for [`LiveHub::unregister`].
    #[must_use]
    pub const fn id(&self) -> ClientId {
        self.id
    }

    /// Next queued message, or `None` once the hub has dropped this client and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.queue.recv().await
    }
}

/// Handle to the hub task.
#[derive(Clone, Debug)]
pub struct LiveHub {
    control: mpsc::Sender<Command>,
    next_id: Arc<AtomicU64>,
    client_capacity: usize,
}

impl LiveHub {
    /// Start the hub task. It stops once every handle is dropped.
    #[must_use]
    pub fn spawn(config: HubConfig) -> (Self, JoinHandle<()>) {
        let (control, commands) = mpsc::channel(config.control_capacity.max(1));
        let task = tokio::spawn(run(commands));
        (
            Self {
                control,
                next_id: Arc::new(AtomicU64::new(1)),
                client_capacity: config.client_capacity.max(1),
            },
            task,
        )
    }

    /// Register a new client and return its queue.
    ///
    /// # Errors
    ///
    /// Returns [`HubClosed`] if the hub task has stopped.
    pub async fn register(&self) -> Result<LiveClient, HubClosed> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, rx) = mpsc::channel(self.client_capacity);
        self.send(Command::Register { id, queue }).await?;
        Ok(LiveClient { id, queue: rx })
    }

    /// Remove a client and close its queue. Unknown ids are ignored.
    pub async fn unregister(&self, id: ClientId) {
        // A stopped hub has already dropped every queue.
        let _ = self.send(Command::Unregister { id }).await;
    }

    /// Offer `payload` to every registered client without waiting on any of them.
    ///
    /// # Errors
    ///
    /// Returns [`HubClosed`] if the hub task has stopped.
    pub async fn broadcast(&self, payload: impl Into<Arc<str>>) -> Result<(), HubClosed> {
        self.send(Command::Broadcast {
            payload: payload.into(),
        })
        .await
    }

    /// Number of registered clients, as seen by the hub after all earlier commands.
    ///
    /// # Errors
    ///
    /// Returns [`HubClosed`] if the hub task has stopped.
    pub async fn connected_count(&self) -> Result<usize, HubClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ConnectedCount { reply }).await?;
        rx.await.map_err(|_| HubClosed)
    }

    async fn send(&self, command: Command) -> Result<(), HubClosed> {
        self.control.send(command).await.map_err(|_| HubClosed)
    }
}

async fn run(mut commands: mpsc::Receiver<Command>) {
    let mut clients: HashMap<ClientId, mpsc::Sender<Arc<str>>> = HashMap::new();
    tracing::info!("Live hub started");

    while let Some(command) = commands.recv().await {
        match command {
            Command::Register { id, queue } => {
                clients.insert(id, queue);
                tracing::debug!(client_id = id, connected = clients.len(), "Client registered");
            },
            Command::Unregister { id } => {
                if clients.remove(&id).is_some() {
                    tracing::debug!(client_id = id, connected = clients.len(), "Client unregistered");
                }
            },
            Command::Broadcast { payload } => {
                clients.retain(|id, queue| match queue.try_send(Arc::clone(&payload)) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        tracing::warn!(client_id = *id, "Client queue full; disconnecting");
                        metrics::counter!(HUB_EVICTIONS).increment(1);
                        false
                    },
                    Err(TrySendError::Closed(_)) => {
                        tracing::debug!(client_id = *id, "Client gone; dropping");
                        false
                    },
                });
                metrics::counter!(HUB_BROADCASTS).increment(1);
            },
            Command::ConnectedCount { reply } => {
                let _ = reply.send(clients.len());
            },
        }
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(HUB_CLIENTS).set(clients.len() as f64);
    }

    tracing::info!("Live hub stopped");
}

/// The hub's own broker consumer: every message on `book.*` becomes a broadcast.
///
/// Deliveries are acked on receipt; live delivery is best effort.
pub struct HubRelay {
    hub: LiveHub,
}

impl HubRelay {
    /// Relay into `hub`.
    #[must_use]
    pub const fn new(hub: LiveHub) -> Self {
        Self { hub }
    }

    /// Subscription for `group` on every lending topic.
    #[must_use]
    pub fn subscription(group: &str) -> Subscription {
        Subscription::new(group, [Topics::ALL])
    }
}

#[async_trait]
impl DeliveryHandler for HubRelay {
    async fn on_delivery(&self, delivery: Delivery) {
        let payload = std::str::from_utf8(delivery.payload()).map(Arc::<str>::from);
        let topic = delivery.topic().to_string();
        delivery.ack();

        match payload {
            Ok(payload) => {
                if self.hub.broadcast(payload).await.is_err() {
                    tracing::warn!(topic = %topic, "Live hub stopped; message not relayed");
                }
            },
            Err(e) => tracing::warn!(topic = %topic, error = %e, "Dropping non-UTF-8 message"),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn hub(capacity: usize) -> LiveHub {
        LiveHub::spawn(HubConfig {
            client_capacity: capacity,
            control_capacity: 64,
        })
        .0
    }

    #[test]
    fn command_debug_omits_payloads() {
        let command = Command::Broadcast {
            payload: Arc::from("secret-ish body"),
        };
        assert_eq!(format!("{command:?}"), "Broadcast(15 bytes)");
        assert_eq!(format!("{:?}", Command::Unregister { id: 4 }), "Unregister(4)");
    }

    #[tokio::test]
    async fn broadcast_reaches_every_client() {
        let hub = hub(8);
        let mut a = hub.register().await.unwrap();
        let mut b = hub.register().await.unwrap();

        hub.broadcast("hello").await.unwrap();

        assert_eq!(&*a.recv().await.unwrap(), "hello");
        assert_eq!(&*b.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_closes_queue() {
        let hub = hub(8);
        let mut client = hub.register().await.unwrap();
        hub.unregister(client.id()).await;
        hub.unregister(client.id()).await;
        hub.unregister(999).await;

        assert_eq!(hub.connected_count().await.unwrap(), 0);
        assert!(client.recv().await.is_none());
    }

    #[tokio::test]
    async fn slow_client_is_disconnected_without_blocking_fast_client() {
        let capacity = 4;
        let events = 20;
        let hub = hub(capacity);
        let mut fast = hub.register().await.unwrap();
        let mut slow = hub.register().await.unwrap();

        let mut fast_received = Vec::new();
        for i in 0..events {
            hub.broadcast(format!("event-{i}")).await.unwrap();
            fast_received.push(fast.recv().await.unwrap());
        }

        assert_eq!(fast_received.len(), events);
        assert_eq!(&*fast_received[events - 1], "event-19");
        assert_eq!(hub.connected_count().await.unwrap(), 1);

        let mut slow_received = 0;
        while let Some(_msg) = slow.recv().await {
            slow_received += 1;
        }
        assert_eq!(slow_received, capacity);
    }

    #[tokio::test]
    async fn dropped_client_is_pruned_on_next_broadcast() {
        let hub = hub(8);
        let client = hub.register().await.unwrap();
        drop(client);

        hub.broadcast("x").await.unwrap();
        assert_eq!(hub.connected_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn hub_stops_when_last_handle_dropped() {
        let (hub, task) = LiveHub::spawn(HubConfig::default());
        drop(hub);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn relay_acks_and_broadcasts() {
        let hub = hub(8);
        let mut client = hub.register().await.unwrap();
        let relay = HubRelay::new(hub.clone());

        let (delivery, settled) = Delivery::new("book.stats", br#"{"type":"STATS_UPDATE"}"#.to_vec(), 1);
        relay.on_delivery(delivery).await;

        assert_eq!(settled.await.unwrap(), lending_core::event_bus::Settlement::Ack);
        assert_eq!(&*client.recv().await.unwrap(), r#"{"type":"STATS_UPDATE"}"#);
    }

    #[tokio::test]
    async fn relay_drops_binary_payloads() {
        let hub = hub(8);
        let mut client = hub.register().await.unwrap();
        let relay = HubRelay::new(hub.clone());

        let (delivery, settled) = Delivery::new("book.borrowed", vec![0xff, 0xfe], 1);
        relay.on_delivery(delivery).await;
        assert_eq!(settled.await.unwrap(), lending_core::event_bus::Settlement::Ack);

        hub.broadcast("next").await.unwrap();
        assert_eq!(&*client.recv().await.unwrap(), "next");
    }
}
