//! `PostgreSQL` consumption log for the counter worker.
//!
//! Every delivery appends a `loan_logs` row. The `applied_events` primary key on
//! `(loan_id, action)` decides whether this delivery is the first one; only then
//! does a borrow bump `books.popularity`. All of it happens in one transaction,
//! so a failed apply leaves no trace and the redelivery starts clean.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lending_core::error::StoreError;
use lending_core::event::LifecycleAction;
use lending_core::store::{ApplyOutcome, ConsumptionEntry, ConsumptionStore, NewConsumptionEntry};
use lending_core::types::{BorrowerId, ItemId, LoanId};
use sqlx::PgPool;

use crate::store_error;

#[derive(sqlx::FromRow)]
struct LogRow {
    id: i64,
    loan_id: i64,
    book_id: i64,
    user_id: i64,
    action: String,
    applied: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<LogRow> for ConsumptionEntry {
    type Error = StoreError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        let action = LifecycleAction::parse(&row.action)
            .ok_or_else(|| StoreError::Query(format!("Invalid log action: {}", row.action)))?;
        Ok(Self {
            id: row.id,
            loan_id: LoanId::new(row.loan_id),
            item_id: ItemId::new(row.book_id),
            borrower_id: BorrowerId::new(row.user_id),
            action,
            applied: row.applied,
            created_at: row.created_at,
        })
    }
}

/// `PostgreSQL` implementation of [`ConsumptionStore`].
#[derive(Clone)]
pub struct PostgresConsumptionLog {
    pool: PgPool,
}

impl PostgresConsumptionLog {
    /// Create a log over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConsumptionStore for PostgresConsumptionLog {
    async fn apply(&self, entry: NewConsumptionEntry) -> Result<ApplyOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("begin transaction", e))?;

        let first = sqlx::query(
            "INSERT INTO applied_events (loan_id, action, applied_at) VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(entry.loan_id.get())
        .bind(entry.action.as_str())
        .bind(entry.received_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| store_error("mark applied", e))?
        .rows_affected()
            == 1;

        if first && entry.action == LifecycleAction::Borrowed {
            sqlx::query("UPDATE books SET popularity = popularity + 1 WHERE id = $1")
                .bind(entry.item_id.get())
                .execute(&mut *tx)
                .await
                .map_err(|e| store_error("increment popularity", e))?;
        }

        sqlx::query(
            r"
            INSERT INTO loan_logs (loan_id, book_id, user_id, action, applied, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(entry.loan_id.get())
        .bind(entry.item_id.get())
        .bind(entry.borrower_id.get())
        .bind(entry.action.as_str())
        .bind(first)
        .bind(entry.received_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| store_error("append log", e))?;

        tx.commit().await.map_err(|e| store_error("commit", e))?;

        Ok(if first {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::AlreadyApplied
        })
    }

    async fn entries_for_loan(&self, loan: LoanId) -> Result<Vec<ConsumptionEntry>, StoreError> {
        let rows: Vec<LogRow> = sqlx::query_as(
            r"
            SELECT id, loan_id, book_id, user_id, action, applied, created_at
            FROM loan_logs
            WHERE loan_id = $1
            ORDER BY id ASC
            ",
        )
        .bind(loan.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("list log entries", e))?;

        rows.into_iter().map(ConsumptionEntry::try_from).collect()
    }
}
