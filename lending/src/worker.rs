//! The counter worker process: one durable consumer maintaining popularity
//! and the consumption log.

use lending_postgres::{DeadLetterQueue, PostgresConsumptionLog};
use lending_runtime::{CounterWorker, EventConsumer};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use crate::bootstrap::Resources;
use crate::lifecycle::{await_shutdown, shutdown_signal};

/// Consume lifecycle events until a shutdown signal, then drain.
///
/// Every instance joins the same consumer group, so instances split partitions
/// and each event is counted by exactly one of them.
pub async fn run(resources: Resources) {
    let config = Arc::clone(&resources.config);
    let log = Arc::new(PostgresConsumptionLog::new(resources.pool.clone()));
    let dead_letters = Arc::new(DeadLetterQueue::new(resources.pool.clone()));
    let worker = CounterWorker::new(log, Arc::clone(&resources.clock)).with_dead_letters(dead_letters);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let consumer = EventConsumer::new(
        "counter-worker",
        CounterWorker::subscription(&config.redpanda.worker_group),
        Arc::clone(&resources.bus),
        Arc::new(worker),
        shutdown_rx,
    )
    .spawn();
    info!(group = %config.redpanda.worker_group, "Counter worker consuming");

    shutdown_signal().await;

    info!("Shutting down gracefully...");
    let _ = shutdown_tx.send(());
    await_shutdown(vec![("counter-worker", consumer)], config.server.shutdown_timeout()).await;
    info!("Graceful shutdown complete");
}
