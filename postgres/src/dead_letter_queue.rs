//! Dead Letter Queue (DLQ) for terminated broker messages.
//!
//! The counter worker terminates payloads it cannot parse; they are never
//! redelivered. This queue keeps the raw bytes and the parse error so an
//! operator can inspect them and close each one as resolved or discarded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lending_core::error::StoreError;
use lending_core::store::DeadLetterSink;
use sqlx::{PgPool, Row};

use crate::store_error;

/// Status of a terminated message in the Dead Letter Queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DLQStatus {
    /// Waiting for investigation
    Pending,
    /// Someone is looking at it
    Processing,
    /// Fixed and replayed by hand
    Resolved,
    /// Permanently dropped
    Discarded,
}

impl DLQStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Resolved => "resolved",
            Self::Discarded => "discarded",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Query`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "resolved" => Ok(Self::Resolved),
            "discarded" => Ok(Self::Discarded),
            _ => Err(StoreError::Query(format!("Invalid DLQ status: {s}"))),
        }
    }
}

/// An entry in the Dead Letter Queue.
#[derive(Debug, Clone)]
pub struct FailedMessage {
    /// Unique identifier for this DLQ entry
    pub id: i64,

    /// Topic the message arrived on
    pub topic: String,

    /// Raw payload as received
    pub payload: Vec<u8>,

    /// Why the message was terminated
    pub error_message: String,

    /// When it was terminated
    pub failed_at: DateTime<Utc>,

    /// Current processing status
    pub status: DLQStatus,

    /// When the entry was closed (if applicable)
    pub resolved_at: Option<DateTime<Utc>>,

    /// Who closed it
    pub resolved_by: Option<String>,

    /// Notes about the resolution
    pub resolution_notes: Option<String>,
}

/// `PostgreSQL`-based Dead Letter Queue.
///
/// # Example
///
/// ```no_run
/// use lending_postgres::{DLQStatus, DeadLetterQueue};
///
/// # async fn example(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
/// let dlq = DeadLetterQueue::new(pool);
///
/// let pending = dlq.list_pending(100).await?;
/// println!("Pending failures: {}", pending.len());
///
/// dlq.update_status(pending[0].id, DLQStatus::Processing).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DeadLetterQueue {
    pool: PgPool,
}

impl DeadLetterQueue {
    /// Create a new Dead Letter Queue with the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Add a terminated message.
    ///
    /// # Returns
    ///
    /// The unique ID of the created DLQ entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the insert fails.
    pub async fn add_entry(&self, topic: &str, payload: &[u8], error_message: &str) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            r"
            INSERT INTO failed_messages (topic, payload, error_message)
            VALUES ($1, $2, $3)
            RETURNING id
            ",
        )
        .bind(topic)
        .bind(payload)
        .bind(error_message)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error("add DLQ entry", e))?;

        tracing::warn!(
            dlq_id = id,
            topic = topic,
            payload_bytes = payload.len(),
            error = error_message,
            "Message added to Dead Letter Queue"
        );

        metrics::counter!("lending.dlq.added", "topic" => topic.to_string()).increment(1);

        Ok(id)
    }

    /// List pending entries, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<FailedMessage>, StoreError> {
        self.list_by_status(DLQStatus::Pending, limit).await
    }

    /// List entries by status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn list_by_status(&self, status: DLQStatus, limit: usize) -> Result<Vec<FailedMessage>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            r"
            SELECT id, topic, payload, error_message, failed_at, status,
                   resolved_at, resolved_by, resolution_notes
            FROM failed_messages
            WHERE status = $1
            ORDER BY failed_at ASC, id ASC
            LIMIT $2
            ",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("list DLQ entries", e))?;

        rows.iter().map(Self::row_to_failed_message).collect()
    }

    /// Get a specific entry by ID.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails or the entry does not exist.
    pub async fn get_by_id(&self, id: i64) -> Result<FailedMessage, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, topic, payload, error_message, failed_at, status,
                   resolved_at, resolved_by, resolution_notes
            FROM failed_messages
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error("get DLQ entry", e))?;

        Self::row_to_failed_message(&row)
    }

    /// Update the status of an entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    pub async fn update_status(&self, id: i64, status: DLQStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE failed_messages SET status = $1 WHERE id = $2")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| store_error("update DLQ status", e))?;

        tracing::info!(dlq_id = id, status = status.as_str(), "DLQ entry status updated");

        Ok(())
    }

    /// Mark an entry as resolved.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    pub async fn mark_resolved(&self, id: i64, resolved_by: &str, notes: Option<&str>) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE failed_messages
            SET status = 'resolved',
                resolved_at = NOW(),
                resolved_by = $1,
                resolution_notes = $2
            WHERE id = $3
            ",
        )
        .bind(resolved_by)
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("resolve DLQ entry", e))?;

        tracing::info!(dlq_id = id, resolved_by = resolved_by, "DLQ entry marked as resolved");

        metrics::counter!("lending.dlq.resolved").increment(1);

        Ok(())
    }

    /// Mark an entry as discarded.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the update fails.
    pub async fn mark_discarded(&self, id: i64, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE failed_messages
            SET status = 'discarded',
                resolved_at = NOW(),
                resolution_notes = $1
            WHERE id = $2
            ",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| store_error("discard DLQ entry", e))?;

        tracing::warn!(dlq_id = id, reason = reason, "DLQ entry marked as discarded");

        metrics::counter!("lending.dlq.discarded").increment(1);

        Ok(())
    }

    /// Number of pending entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the query fails.
    pub async fn count_pending(&self) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM failed_messages WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_error("count DLQ entries", e))?;

        Ok(count)
    }

    fn row_to_failed_message(row: &sqlx::postgres::PgRow) -> Result<FailedMessage, StoreError> {
        let status_str: String = row.get("status");
        let status = DLQStatus::parse(&status_str)?;

        Ok(FailedMessage {
            id: row.get("id"),
            topic: row.get("topic"),
            payload: row.get("payload"),
            error_message: row.get("error_message"),
            failed_at: row.get("failed_at"),
            status,
            resolved_at: row.get("resolved_at"),
            resolved_by: row.get("resolved_by"),
            resolution_notes: row.get("resolution_notes"),
        })
    }
}

#[async_trait]
impl DeadLetterSink for DeadLetterQueue {
    async fn record(&self, topic: &str, payload: &[u8], reason: &str) -> Result<(), StoreError> {
        self.add_entry(topic, payload, reason).await.map(|_| ())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn dlq_status_parses_its_own_names() {
        for status in [
            DLQStatus::Pending,
            DLQStatus::Processing,
            DLQStatus::Resolved,
            DLQStatus::Discarded,
        ] {
            assert_eq!(DLQStatus::parse(status.as_str()).expect("known status"), status);
        }
    }

    #[test]
    fn dlq_status_invalid() {
        assert!(matches!(DLQStatus::parse("archived"), Err(StoreError::Query(_))));
    }
}
