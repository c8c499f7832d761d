//! The HTTP server process: loan routes, live feed and the hub's relay consumer.

use anyhow::Context;
use lending_postgres::PostgresInventoryStore;
use lending_runtime::{EventConsumer, EventPublisher, HubConfig, HubRelay, LiveHub, LoanManager};
use lending_web::{AppState, JwtVerifier, build_router};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::bootstrap::Resources;
use crate::lifecycle::{await_shutdown, shutdown_signal};

/// Wire the engine, serve HTTP until a shutdown signal, then drain.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn run(resources: Resources) -> anyhow::Result<()> {
    let config = Arc::clone(&resources.config);
    if config.uses_dev_secret() {
        warn!("JWT_SECRET not set; using the development secret");
    }

    let store = Arc::new(PostgresInventoryStore::new(resources.pool.clone()));
    let publisher = EventPublisher::new(Arc::clone(&resources.bus), Arc::clone(&resources.clock))
        .with_timeout(config.redpanda.publish_timeout())
        .with_stats_from(store.clone());
    let loans = Arc::new(
        LoanManager::new(store, publisher, Arc::clone(&resources.clock))
            .with_loan_period(config.lending.loan_period()),
    );

    let (hub, hub_task) = LiveHub::spawn(HubConfig {
        client_capacity: config.hub.client_capacity,
        control_capacity: config.hub.control_capacity,
    });

    let (shutdown_tx, _) = broadcast::channel(1);
    let relay = EventConsumer::new(
        "live-hub",
        HubRelay::subscription(&config.redpanda.hub_group),
        Arc::clone(&resources.bus),
        Arc::new(HubRelay::new(hub.clone())),
        shutdown_tx.subscribe(),
    )
    .spawn();

    let state = AppState::new(loans, hub, Arc::new(JwtVerifier::new(config.auth.jwt_secret.as_bytes())));
    let addr = config.server.addr().context("invalid server address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(address = %addr, hub_group = %config.redpanda.hub_group, "HTTP server listening");

    let mut stop = shutdown_tx.subscribe();
    let mut http = tokio::spawn(async move {
        let served = axum::serve(listener, build_router(state))
            .with_graceful_shutdown(async move {
                let _ = stop.recv().await;
            })
            .await;
        if let Err(e) = served {
            warn!(error = %e, "HTTP server failed");
        }
    });

    let http_finished = tokio::select! {
        () = shutdown_signal() => false,
        result = &mut http => {
            if let Err(e) = result {
                warn!(error = %e, "HTTP server task failed");
            }
            true
        },
    };

    info!("Shutting down gracefully...");
    let _ = shutdown_tx.send(());
    let mut tasks = Vec::with_capacity(3);
    if !http_finished {
        tasks.push(("http", http));
    }
    tasks.push(("live-hub-relay", relay));
    tasks.push(("live-hub", hub_task));
    await_shutdown(tasks, config.server.shutdown_timeout()).await;
    info!("Graceful shutdown complete");
    Ok(())
}
