//! Prometheus metrics for the lending engine.
//!
//! Components record through the `metrics` facade using the names below; the
//! binaries install the Prometheus exporter with [`MetricsServer::start`].
//! Without an installed recorder every call is a no-op, which is what tests rely on.

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use thiserror::Error;

/// Borrows that committed
pub const BORROW_SUCCEEDED: &str = "lending_borrow_succeeded_total";
/// Borrows rejected or failed, labelled by `reason`
pub const BORROW_REJECTED: &str = "lending_borrow_rejected_total";
/// Returns that committed
pub const RETURN_SUCCEEDED: &str = "lending_return_succeeded_total";
/// Returns rejected or failed, labelled by `reason`
pub const RETURN_REJECTED: &str = "lending_return_rejected_total";
/// Publishes accepted by the broker, labelled by `topic`
pub const PUBLISH_SUCCEEDED: &str = "lending_publish_succeeded_total";
/// Publishes that failed or timed out, labelled by `topic`
pub const PUBLISH_FAILED: &str = "lending_publish_failed_total";
/// Worker settlements, labelled by `outcome` (`ack`, `nak`, `term`)
pub const WORKER_MESSAGES: &str = "lending_worker_messages_total";
/// Redeliveries whose effect had already been applied
pub const WORKER_DUPLICATES: &str = "lending_worker_duplicates_total";
/// Live clients currently registered
pub const HUB_CLIENTS: &str = "lending_hub_clients";
/// Messages broadcast by the hub
pub const HUB_BROADCASTS: &str = "lending_hub_broadcasts_total";
/// Clients disconnected because their queue was full or closed
pub const HUB_EVICTIONS: &str = "lending_hub_evictions_total";

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter serving `/metrics` on its own listener.
pub struct MetricsServer {
    addr: SocketAddr,
}

impl MetricsServer {
    /// Create a server that will listen on `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }

    /// Install the recorder and start the HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if the exporter cannot be installed. A
    /// recorder that is already installed is logged and tolerated.
    pub fn start(&self) -> Result<(), MetricsError> {
        match PrometheusBuilder::new().with_http_listener(self.addr).install() {
            Ok(()) => {
                describe_metrics();
                tracing::info!(addr = %self.addr, "Metrics exporter listening");
                Ok(())
            },
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            },
        }
    }
}

fn describe_metrics() {
    describe_counter!(BORROW_SUCCEEDED, "Borrows that committed");
    describe_counter!(BORROW_REJECTED, "Borrows rejected by a business rule or failed");
    describe_counter!(RETURN_SUCCEEDED, "Returns that committed");
    describe_counter!(RETURN_REJECTED, "Returns rejected by a business rule or failed");
    describe_counter!(PUBLISH_SUCCEEDED, "Lifecycle and stats messages accepted by the broker");
    describe_counter!(PUBLISH_FAILED, "Publishes that failed or timed out (logged and dropped)");
    describe_counter!(WORKER_MESSAGES, "Messages settled by the counter worker");
    describe_counter!(WORKER_DUPLICATES, "Redelivered events whose effect was already applied");
    describe_gauge!(HUB_CLIENTS, "Live clients currently registered with the hub");
    describe_counter!(HUB_BROADCASTS, "Messages broadcast to live clients");
    describe_counter!(HUB_EVICTIONS, "Live clients disconnected for not draining their queue");
}
