//! Infrastructure set-up shared by both binaries.
//!
//! 1. Initialise tracing
//! 2. Connect to `PostgreSQL` (retrying while it starts) and run migrations
//! 3. Connect to the Redpanda event bus
//! 4. Install the Prometheus exporter

use anyhow::Context;
use lending_core::environment::{Clock, SystemClock};
use lending_core::event_bus::EventBus;
use lending_postgres::PgPool;
use lending_redpanda::RedpandaEventBus;
use lending_runtime::{RetryPolicy, metrics::MetricsServer, retry_with_backoff};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, Role};

/// Install the global tracing subscriber: `RUST_LOG` filter (default `info`) and fmt output.
///
/// A second call is ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,sqlx=warn,rdkafka=warn".into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Infrastructure handles shared by the components of one process.
#[derive(Clone)]
pub struct Resources {
    /// Application configuration
    pub config: Arc<Config>,
    /// Connection pool with migrations applied
    pub pool: PgPool,
    /// Event bus
    pub bus: Arc<dyn EventBus>,
    /// System clock for timestamps
    pub clock: Arc<dyn Clock>,
}

impl Resources {
    /// Connect to every dependency named by `config`, with the event bus set up
    /// for the consumer group `role` runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the database stays unreachable after the configured
    /// retries, a migration fails, or the event bus cannot be built.
    pub async fn from_config(config: Config, role: Role) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL...");
        let policy = RetryPolicy::builder()
            .max_retries(config.postgres.connect_retries)
            .initial_delay(Duration::from_millis(500))
            .max_delay(Duration::from_secs(10))
            .build();
        let url = config.postgres.url.clone();
        let max_connections = config.postgres.max_connections;
        let pool = retry_with_backoff(&policy, "postgres connect", || {
            lending_postgres::connect(&url, max_connections)
        })
        .await
        .context("PostgreSQL unreachable")?;

        info!("Running migrations...");
        lending_postgres::migrate(&pool).await.context("migrations failed")?;
        info!("PostgreSQL ready");

        let offset_reset = config.redpanda.offset_reset_for(role).to_string();
        info!(
            brokers = %config.redpanda.brokers,
            auto_offset_reset = %offset_reset,
            "Connecting to Redpanda event bus..."
        );
        let mut builder = RedpandaEventBus::builder()
            .brokers(config.redpanda.brokers.clone())
            .redelivery_delay(config.redpanda.redelivery_delay())
            .auto_offset_reset(offset_reset);
        if let Some(max) = config.redpanda.max_deliveries {
            builder = builder.max_deliveries(max);
        }
        let bus: Arc<dyn EventBus> = Arc::new(builder.build().context("event bus unavailable")?);
        info!("Event bus connected");

        Ok(Self {
            config: Arc::new(config),
            pool,
            bus,
            clock: Arc::new(SystemClock),
        })
    }
}

/// Start the Prometheus exporter on the configured metrics address.
///
/// # Errors
///
/// Returns an error if the address is invalid or the exporter cannot be installed.
pub fn start_metrics(config: &Config) -> anyhow::Result<()> {
    let addr = config.server.metrics_addr().context("invalid metrics address")?;
    MetricsServer::new(addr).start()?;
    Ok(())
}
