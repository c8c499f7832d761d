//! Loan lifecycle manager.
//!
//! Executes borrow and return as one store transaction each, then hands the
//! resulting [`LifecycleEvent`] to the [`EventPublisher`] without waiting for it.
//!
//! ```text
//! none ──borrow──► Active ──return──► Returned
//! ```
//!
//! Business-rule rejections abort the transaction before commit and never
//! produce an event. Whatever happens to the event after commit is invisible to
//! the caller.

use chrono::Duration;
use lending_core::environment::Clock;
use lending_core::error::{LendingError, StoreError};
use lending_core::event::LifecycleEvent;
use lending_core::store::{InventoryStore, InventoryTx};
use lending_core::types::{BorrowerId, ItemId, Loan, LoanDetails, LoanId, LoanStats, NewLoan};
use std::sync::Arc;

use crate::metrics::{BORROW_REJECTED, BORROW_SUCCEEDED, RETURN_REJECTED, RETURN_SUCCEEDED};
use crate::publisher::EventPublisher;

/// Default loan period
pub const DEFAULT_LOAN_PERIOD_DAYS: i64 = 7;

/// Borrow/return state machine over an [`InventoryStore`].
pub struct LoanManager {
    store: Arc<dyn InventoryStore>,
    publisher: EventPublisher,
    clock: Arc<dyn Clock>,
    loan_period: Duration,
}

impl LoanManager {
    /// Create a manager with the default seven-day loan period.
    #[must_use]
    pub fn new(store: Arc<dyn InventoryStore>, publisher: EventPublisher, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            publisher,
            clock,
            loan_period: Duration::days(DEFAULT_LOAN_PERIOD_DAYS),
        }
    }

    /// Override the loan period.
    #[must_use]
    pub const fn with_loan_period(mut self, loan_period: Duration) -> Self {
        self.loan_period = loan_period;
        self
    }

    /// Borrow `item` for `borrower`.
    ///
    /// On success the returned loan is committed and a borrow event has been
    /// handed to the publisher.
    ///
    /// # Errors
    ///
    /// - [`LendingError::Validation`] for non-positive ids, or a loan period that
    ///   puts the due date out of range
    /// - [`LendingError::NotFound`] if the item or borrower does not exist
    /// - [`LendingError::OutOfStock`] if no copy is on the shelf
    /// - [`LendingError::DuplicateLoan`] if the borrower already holds this item
    /// - [`LendingError::Store`] if the store fails, including at commit
    pub async fn borrow(&self, borrower: BorrowerId, item: ItemId) -> Result<LoanDetails, LendingError> {
        let result = self.try_borrow(borrower, item).await;

        match &result {
            Ok(details) => {
                metrics::counter!(BORROW_SUCCEEDED).increment(1);
                tracing::info!(
                    loan_id = %details.loan.id,
                    borrower_id = %borrower,
                    item_id = %item,
                    due_at = %details.loan.due_at,
                    "Loan created"
                );
                self.publisher.publish_detached(LifecycleEvent::borrowed(
                    item,
                    borrower,
                    details.loan.id,
                    details.loan.loaned_at,
                ));
            },
            Err(e) => {
                metrics::counter!(BORROW_REJECTED, "reason" => e.code()).increment(1);
                tracing::info!(borrower_id = %borrower, item_id = %item, error = %e, "Borrow rejected");
            },
        }

        result
    }

    async fn try_borrow(&self, borrower: BorrowerId, item: ItemId) -> Result<LoanDetails, LendingError> {
        if !borrower.is_valid() {
            return Err(LendingError::Validation(format!("borrower id must be positive, got {borrower}")));
        }
        if !item.is_valid() {
            return Err(LendingError::Validation(format!("item id must be positive, got {item}")));
        }

        let now = self.clock.now();
        let due_at = now.checked_add_signed(self.loan_period).ok_or_else(|| {
            LendingError::Validation(format!(
                "loan period of {} days is out of range",
                self.loan_period.num_days()
            ))
        })?;

        let mut tx = self.store.begin().await?;

        let row = tx
            .lock_item(item)
            .await?
            .ok_or(LendingError::item_not_found(item))?;
        if row.stock < 1 {
            return Err(LendingError::OutOfStock { item_id: item });
        }
        if tx.count_active_loans(borrower, item).await? > 0 {
            return Err(LendingError::DuplicateLoan {
                borrower_id: borrower,
                item_id: item,
            });
        }
        let borrower_details = tx
            .borrower(borrower)
            .await?
            .ok_or(LendingError::borrower_not_found(borrower))?;

        if !tx.decrement_stock_if_positive(item).await? {
            return Err(LendingError::OutOfStock { item_id: item });
        }

        let loan = insert_loan(
            tx.as_mut(),
            NewLoan {
                borrower_id: borrower,
                item_id: item,
                loaned_at: now,
                due_at,
            },
        )
        .await?;

        tx.commit().await?;

        Ok(LoanDetails {
            loan,
            item: row.summary(),
            borrower: borrower_details,
        })
    }

    /// Return `loan` on behalf of `requester`.
    ///
    /// Returning the same loan twice fails the second time; stock is incremented
    /// exactly once.
    ///
    /// # Errors
    ///
    /// - [`LendingError::Validation`] for non-positive ids
    /// - [`LendingError::NotFound`] if the loan does not exist
    /// - [`LendingError::Forbidden`] if `requester` is not the borrower
    /// - [`LendingError::AlreadyReturned`] if the loan is no longer active
    /// - [`LendingError::Store`] if the store fails, including at commit
    pub async fn return_loan(&self, loan: LoanId, requester: BorrowerId) -> Result<(), LendingError> {
        match self.try_return(loan, requester).await {
            Ok(event) => {
                metrics::counter!(RETURN_SUCCEEDED).increment(1);
                tracing::info!(loan_id = %loan, borrower_id = %requester, item_id = %event.item_id, "Loan returned");
                self.publisher.publish_detached(event);
                Ok(())
            },
            Err(e) => {
                metrics::counter!(RETURN_REJECTED, "reason" => e.code()).increment(1);
                tracing::info!(loan_id = %loan, borrower_id = %requester, error = %e, "Return rejected");
                Err(e)
            },
        }
    }

    async fn try_return(&self, loan_id: LoanId, requester: BorrowerId) -> Result<LifecycleEvent, LendingError> {
        if !loan_id.is_valid() {
            return Err(LendingError::Validation(format!("loan id must be positive, got {loan_id}")));
        }
        if !requester.is_valid() {
            return Err(LendingError::Validation(format!("borrower id must be positive, got {requester}")));
        }

        let mut tx = self.store.begin().await?;

        let loan = tx
            .lock_loan(loan_id)
            .await?
            .ok_or(LendingError::loan_not_found(loan_id))?;
        if loan.borrower_id != requester {
            return Err(LendingError::Forbidden { loan_id });
        }
        if !loan.is_active() {
            return Err(LendingError::AlreadyReturned { loan_id });
        }

        let now = self.clock.now();
        if !tx.mark_returned(loan_id, now).await? {
            return Err(LendingError::AlreadyReturned { loan_id });
        }
        tx.increment_stock(loan.item_id).await?;
        tx.commit().await?;

        Ok(LifecycleEvent::returned(loan.item_id, loan.borrower_id, loan_id, now))
    }

    /// A borrower's loans, newest first.
    ///
    /// # Errors
    ///
    /// [`LendingError::Validation`] for a non-positive id, [`LendingError::Store`]
    /// if the read fails.
    pub async fn loans_for(&self, borrower: BorrowerId) -> Result<Vec<Loan>, LendingError> {
        if !borrower.is_valid() {
            return Err(LendingError::Validation(format!("borrower id must be positive, got {borrower}")));
        }
        Ok(self.store.loans_for_borrower(borrower).await?)
    }

    /// Aggregate loan counts.
    ///
    /// # Errors
    ///
    /// [`LendingError::Store`] if the read fails.
    pub async fn stats(&self) -> Result<LoanStats, LendingError> {
        Ok(self.store.loan_stats().await?)
    }
}

/// The unique index on active loans backs up the duplicate check.
async fn insert_loan(tx: &mut dyn InventoryTx, loan: NewLoan) -> Result<Loan, LendingError> {
    let (borrower_id, item_id) = (loan.borrower_id, loan.item_id);
    tx.insert_loan(loan).await.map_err(|e| match e {
        StoreError::Constraint(_) => LendingError::DuplicateLoan { borrower_id, item_id },
        other => LendingError::Store(other),
    })
}
