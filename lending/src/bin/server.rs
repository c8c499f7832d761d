//! Lending HTTP server.
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run server
//! cargo run --bin lending-server
//! ```

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
        port = config.server.port,
        "Starting lending server"
    );

    start_metrics(&config)?;
    let resources = Resources::from_config(config, Role::Server).await?;
    lending::server::run(resources).await
}
