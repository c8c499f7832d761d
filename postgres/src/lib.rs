//! `PostgreSQL` storage for the lending engine.
//!
//! - [`PostgresInventoryStore`]: items, borrowers and loans, driven by the loan
//!   lifecycle through row-locking transactions
//! - [`PostgresConsumptionLog`]: the counter worker's log and popularity update
//! - [`DeadLetterQueue`]: messages the counter worker terminated
//!
//! All three share one [`PgPool`]. The schema lives in `migrations/` and is
//! applied with [`migrate`].
//!
//! # Example
//!
//! ```no_run
//! use lending_postgres::{PostgresInventoryStore, connect, migrate};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = connect("postgres://localhost/lending", 10).await?;
//! migrate(&pool).await?;
//! let store = PostgresInventoryStore::new(pool);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consumption;
pub mod dead_letter_queue;
pub mod inventory;

pub use consumption::PostgresConsumptionLog;
pub use dead_letter_queue::{DLQStatus, DeadLetterQueue, FailedMessage};
pub use inventory::PostgresInventoryStore;
pub use sqlx::PgPool;

use lending_core::error::StoreError;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Open a connection pool and check it with one round trip.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the database cannot be reached.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

    sqlx::query("SELECT 1")
        .execute(&pool)
        .await
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;

    Ok(pool)
}

/// Apply the embedded migrations.
///
/// # Errors
///
/// Returns [`StoreError::Query`] if a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Query(format!("Migration failed: {e}")))?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Map a sqlx error onto the store taxonomy.
///
/// Connection-level failures are [`StoreError::Unavailable`], unique violations
/// are [`StoreError::Constraint`], everything else is [`StoreError::Query`].
pub(crate) fn store_error(context: &str, error: sqlx::Error) -> StoreError {
    match &error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::Unavailable(format!("{context}: {error}")),
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Constraint(format!("{context}: {error}"))
        },
        _ => StoreError::Query(format!("{context}: {error}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_failures_are_transient() {
        let err = store_error("begin", sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn missing_row_is_a_query_error() {
        let err = store_error("load loan", sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::Query(ref m) if m.starts_with("load loan")));
        assert!(!err.is_transient());
    }
}
