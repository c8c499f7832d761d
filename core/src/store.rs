//! Storage contracts.
//!
//! - [`InventoryStore`] / [`InventoryTx`]: items, loans and borrowers, driven by the
//!   loan lifecycle. Every state change happens inside one [`InventoryTx`].
//! - [`ConsumptionStore`]: the counter worker's log and popularity update.
//! - [`DeadLetterSink`]: where terminated messages are recorded.

use crate::error::StoreError;
use crate::event::LifecycleAction;
use crate::types::{BorrowerId, BorrowerSummary, Item, ItemId, Loan, LoanId, LoanStats, NewLoan};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entry point to the inventory store.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if no connection can be obtained.
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError>;

    /// Read an item outside any transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    async fn item(&self, id: ItemId) -> Result<Option<Item>, StoreError>;

    /// All loans of a borrower, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    async fn loans_for_borrower(&self, borrower: BorrowerId) -> Result<Vec<Loan>, StoreError>;

    /// Aggregate loan counts.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    async fn loan_stats(&self) -> Result<LoanStats, StoreError>;
}

/// One open inventory transaction.
///
/// Dropping the transaction without calling [`commit`](InventoryTx::commit) rolls
/// it back. Methods returning [`StoreError`] leave the transaction unusable; the
/// caller drops it.
#[async_trait]
pub trait InventoryTx: Send {
    /// Load an item and lock its row until the transaction ends.
    async fn lock_item(&mut self, id: ItemId) -> Result<Option<Item>, StoreError>;

    /// Number of active loans for the pair.
    async fn count_active_loans(&mut self, borrower: BorrowerId, item: ItemId) -> Result<i64, StoreError>;

    /// Decrement stock by one if it is positive. Returns whether a row changed.
    async fn decrement_stock_if_positive(&mut self, item: ItemId) -> Result<bool, StoreError>;

    /// Increment stock by one.
    async fn increment_stock(&mut self, item: ItemId) -> Result<(), StoreError>;

    /// Insert an active loan.
    ///
    /// Fails with [`StoreError::Constraint`] if the pair already has an active loan.
    async fn insert_loan(&mut self, loan: NewLoan) -> Result<Loan, StoreError>;

    /// Load a loan and lock its row until the transaction ends.
    async fn lock_loan(&mut self, id: LoanId) -> Result<Option<Loan>, StoreError>;

    /// Mark an active loan returned. Returns `false` if it was not active.
    async fn mark_returned(&mut self, id: LoanId, at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Borrower details for display.
    async fn borrower(&mut self, id: BorrowerId) -> Result<Option<BorrowerSummary>, StoreError>;

    /// Commit every change made through this transaction.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// A processed lifecycle event, as handed to the consumption log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewConsumptionEntry {
    /// Loan the event refers to
    pub loan_id: LoanId,
    /// Item the event refers to
    pub item_id: ItemId,
    /// Borrower the event refers to
    pub borrower_id: BorrowerId,
    /// Borrow or return
    pub action: LifecycleAction,
    /// When the worker processed the delivery
    pub received_at: DateTime<Utc>,
}

/// A consumption log row. One exists per processed delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionEntry {
    /// Row identifier
    pub id: i64,
    /// Loan the event refers to
    pub loan_id: LoanId,
    /// Item the event refers to
    pub item_id: ItemId,
    /// Borrower the event refers to
    pub borrower_id: BorrowerId,
    /// Borrow or return
    pub action: LifecycleAction,
    /// Whether this delivery changed state (false for redeliveries)
    pub applied: bool,
    /// When the row was written
    pub created_at: DateTime<Utc>,
}

/// Result of [`ConsumptionStore::apply`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First delivery of this (loan, action); state was updated
    Applied,
    /// Seen before; only the log row was appended
    AlreadyApplied,
}

/// Consumption log owned by the counter worker.
#[async_trait]
pub trait ConsumptionStore: Send + Sync {
    /// In one transaction: append a log row, and the first time a (loan, action)
    /// is seen, apply its effect (a borrow increments the item's popularity).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the transaction fails; nothing is written then.
    async fn apply(&self, entry: NewConsumptionEntry) -> Result<ApplyOutcome, StoreError>;

    /// Log rows for a loan, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    async fn entries_for_loan(&self, loan: LoanId) -> Result<Vec<ConsumptionEntry>, StoreError>;
}

/// Destination for messages the worker terminates.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    /// Record a terminated message.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the record cannot be written.
    async fn record(&self, topic: &str, payload: &[u8], reason: &str) -> Result<(), StoreError>;
}
