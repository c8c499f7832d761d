//! Shutdown signalling and task draining.
//!
//! When a shutdown signal is received (Ctrl+C or SIGTERM):
//! 1. The HTTP server (if any) stops accepting new connections
//! 2. Shutdown is broadcast to every consumer loop
//! 3. Each task gets the configured timeout to finish its current delivery
//! 4. Tasks still running after that are abandoned

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Wait for Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}

/// Wait for each named task in turn, giving each up to `timeout`.
///
/// A task that overruns is aborted.
pub async fn await_shutdown(tasks: Vec<(&'static str, JoinHandle<()>)>, timeout: Duration) {
    for (name, mut handle) in tasks {
        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => info!(task = name, "Stopped gracefully"),
            Ok(Err(e)) => warn!(task = name, error = %e, "Task failed"),
            Err(_) => {
                warn!(task = name, "Shutdown timed out; aborting");
                handle.abort();
            },
        }
    }
}
