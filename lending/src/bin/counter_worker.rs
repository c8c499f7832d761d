//! Durable counter worker.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin counter-worker
//! ```
//!
//! Start several to share the load; they join one consumer group.

use lending::config::Role;
use lending::{Config, Resources, init_tracing, start_metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Config::from_env();
    tracing::info!(
        redpanda = %config.redpanda.brokers,
        group = %config.redpanda.worker_group,
        "Starting counter worker"
    );

    start_metrics(&config)?;
    let resources = Resources::from_config(config, Role::Worker).await?;
    lending::worker::run(resources).await;
    Ok(())
}
