//! `PostgreSQL` inventory store.
//!
//! Each [`InventoryTx`] wraps one sqlx transaction. Item and loan reads inside
//! it take `FOR UPDATE` row locks, so two borrows of the same item serialize on
//! the item row and two returns of the same loan serialize on the loan row.
//! Dropping the transaction without commit rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lending_core::error::StoreError;
use lending_core::store::{InventoryStore, InventoryTx};
use lending_core::types::{
    BorrowerId, BorrowerSummary, Item, ItemId, Loan, LoanId, LoanStats, LoanStatus, NewLoan,
};
use sqlx::{PgPool, Postgres, Transaction};

use crate::store_error;

const LOAN_COLUMNS: &str = "id, user_id, book_id, loaned_at, due_at, returned_at, status";

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: i64,
    title: String,
    author: String,
    stock: i32,
    popularity: i64,
}

impl From<ItemRow> for Item {
    fn from(row: ItemRow) -> Self {
        Self {
            id: ItemId::new(row.id),
            title: row.title,
            author: row.author,
            stock: row.stock,
            popularity: row.popularity,
        }
    }
}

#[derive(sqlx::FromRow)]
struct LoanRow {
    id: i64,
    user_id: i64,
    book_id: i64,
    loaned_at: DateTime<Utc>,
    due_at: DateTime<Utc>,
    returned_at: Option<DateTime<Utc>>,
    status: String,
}

impl TryFrom<LoanRow> for Loan {
    type Error = StoreError;

    fn try_from(row: LoanRow) -> Result<Self, Self::Error> {
        let status = LoanStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Query(format!("Invalid loan status: {}", row.status)))?;
        Ok(Self {
            id: LoanId::new(row.id),
            borrower_id: BorrowerId::new(row.user_id),
            item_id: ItemId::new(row.book_id),
            loaned_at: row.loaned_at,
            due_at: row.due_at,
            returned_at: row.returned_at,
            status,
        })
    }
}

/// `PostgreSQL` implementation of [`InventoryStore`].
#[derive(Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Create a store over `pool`.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_error("begin transaction", e))?;
        Ok(Box::new(PostgresInventoryTx { tx }))
    }

    async fn item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        let row: Option<ItemRow> =
            sqlx::query_as("SELECT id, title, author, stock, popularity FROM books WHERE id = $1")
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_error("load item", e))?;
        Ok(row.map(Item::from))
    }

    async fn loans_for_borrower(&self, borrower: BorrowerId) -> Result<Vec<Loan>, StoreError> {
        let rows: Vec<LoanRow> = sqlx::query_as(&format!(
            "SELECT {LOAN_COLUMNS} FROM loans WHERE user_id = $1 ORDER BY loaned_at DESC, id DESC"
        ))
        .bind(borrower.get())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_error("list loans", e))?;

        rows.into_iter().map(Loan::try_from).collect()
    }

    async fn loan_stats(&self) -> Result<LoanStats, StoreError> {
        let (total, active, returned): (i64, i64, i64) = sqlx::query_as(
            r"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE status = 'active'),
                COUNT(*) FILTER (WHERE status = 'returned')
            FROM loans
            ",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_error("loan stats", e))?;

        Ok(LoanStats {
            total_transactions: total,
            currently_borrowed: active,
            returned_books: returned,
        })
    }
}

struct PostgresInventoryTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InventoryTx for PostgresInventoryTx {
    async fn lock_item(&mut self, id: ItemId) -> Result<Option<Item>, StoreError> {
        let row: Option<ItemRow> = sqlx::query_as(
            "SELECT id, title, author, stock, popularity FROM books WHERE id = $1 FOR UPDATE",
        )
        .bind(id.get())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_error("lock item", e))?;
        Ok(row.map(Item::from))
    }

    async fn count_active_loans(&mut self, borrower: BorrowerId, item: ItemId) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM loans WHERE user_id = $1 AND book_id = $2 AND status = 'active'",
        )
        .bind(borrower.get())
        .bind(item.get())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| store_error("count active loans", e))?;
        Ok(count)
    }

    async fn decrement_stock_if_positive(&mut self, item: ItemId) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE books SET stock = stock - 1 WHERE id = $1 AND stock > 0")
            .bind(item.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| store_error("decrement stock", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn increment_stock(&mut self, item: ItemId) -> Result<(), StoreError> {
        sqlx::query("UPDATE books SET stock = stock + 1 WHERE id = $1")
            .bind(item.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| store_error("increment stock", e))?;
        Ok(())
    }

    async fn insert_loan(&mut self, loan: NewLoan) -> Result<Loan, StoreError> {
        let row: LoanRow = sqlx::query_as(&format!(
            r"
            INSERT INTO loans (user_id, book_id, loaned_at, due_at, status)
            VALUES ($1, $2, $3, $4, 'active')
            RETURNING {LOAN_COLUMNS}
            "
        ))
        .bind(loan.borrower_id.get())
        .bind(loan.item_id.get())
        .bind(loan.loaned_at)
        .bind(loan.due_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| store_error("insert loan", e))?;

        Loan::try_from(row)
    }

    async fn lock_loan(&mut self, id: LoanId) -> Result<Option<Loan>, StoreError> {
        let row: Option<LoanRow> =
            sqlx::query_as(&format!("SELECT {LOAN_COLUMNS} FROM loans WHERE id = $1 FOR UPDATE"))
                .bind(id.get())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| store_error("lock loan", e))?;
        row.map(Loan::try_from).transpose()
    }

    async fn mark_returned(&mut self, id: LoanId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE loans SET status = 'returned', returned_at = $2 WHERE id = $1 AND status = 'active'",
        )
        .bind(id.get())
        .bind(at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| store_error("mark returned", e))?;
        Ok(result.rows_affected() == 1)
    }

    async fn borrower(&mut self, id: BorrowerId) -> Result<Option<BorrowerSummary>, StoreError> {
        let row: Option<(i64, String, String)> =
            sqlx::query_as("SELECT id, name, email FROM users WHERE id = $1")
                .bind(id.get())
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(|e| store_error("load borrower", e))?;
        Ok(row.map(|(id, name, email)| BorrowerSummary {
            id: BorrowerId::new(id),
            name,
            email,
        }))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| store_error("commit", e))
    }
}
