//! In-memory inventory store.
//!
//! Transactions are fully serialized: [`InventoryStore::begin`] takes the store
//! lock and works on a copy of the state, which `commit` writes back. Dropping
//! the transaction discards the copy.
//!
//! The same value also implements [`ConsumptionStore`] and [`DeadLetterSink`], so
//! worker tests can assert on popularity, log rows and dead letters in one place.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lending_core::error::StoreError;
use lending_core::event::LifecycleAction;
use lending_core::store::{
    ApplyOutcome, ConsumptionEntry, ConsumptionStore, DeadLetterSink, InventoryStore, InventoryTx,
    NewConsumptionEntry,
};
use lending_core::types::{
    BorrowerId, BorrowerSummary, Item, ItemId, Loan, LoanId, LoanStats, LoanStatus, NewLoan,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A message recorded by the in-memory [`DeadLetterSink`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeadLetter {
    /// Topic it arrived on
    pub topic: String,
    /// Raw payload
    pub payload: Vec<u8>,
    /// Why it was terminated
    pub reason: String,
}

#[derive(Clone, Debug, Default)]
struct State {
    items: BTreeMap<ItemId, Item>,
    borrowers: BTreeMap<BorrowerId, BorrowerSummary>,
    loans: BTreeMap<LoanId, Loan>,
    next_loan_id: i64,
    log: Vec<ConsumptionEntry>,
    applied: HashSet<(LoanId, LifecycleAction)>,
    dead_letters: Vec<DeadLetter>,
}

/// In-memory implementation of the store contracts.
#[derive(Clone)]
pub struct InMemoryInventoryStore {
    state: Arc<Mutex<State>>,
    fail_commits: Arc<AtomicBool>,
    failing_applies: Arc<AtomicUsize>,
}

impl Default for InMemoryInventoryStore {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl InMemoryInventoryStore {
    /// Start seeding a store.
    #[must_use]
    pub fn builder() -> InMemoryInventoryStoreBuilder {
        InMemoryInventoryStoreBuilder::default()
    }

    /// Make every subsequent commit fail with [`StoreError::Unavailable`].
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Make the next `n` calls to [`ConsumptionStore::apply`] fail.
    pub fn fail_next_applies(&self, n: usize) {
        self.failing_applies.store(n, Ordering::SeqCst);
    }

    /// Current state of an item.
    pub async fn item_snapshot(&self, id: ItemId) -> Option<Item> {
        self.state.lock().await.items.get(&id).cloned()
    }

    /// Every loan, by id.
    pub async fn loans(&self) -> Vec<Loan> {
        self.state.lock().await.loans.values().cloned().collect()
    }

    /// Every consumption log row, in insertion order.
    pub async fn consumption_log(&self) -> Vec<ConsumptionEntry> {
        self.state.lock().await.log.clone()
    }

    /// Every dead letter, in insertion order.
    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.state.lock().await.dead_letters.clone()
    }
}

/// Seeds an [`InMemoryInventoryStore`].
#[derive(Default)]
pub struct InMemoryInventoryStoreBuilder {
    state: State,
}

impl InMemoryInventoryStoreBuilder {
    /// Add an item.
    #[must_use]
    pub fn item(mut self, item: Item) -> Self {
        self.state.items.insert(item.id, item);
        self
    }

    /// Add a borrower.
    #[must_use]
    pub fn borrower(mut self, id: BorrowerId, name: &str, email: &str) -> Self {
        self.state.borrowers.insert(
            id,
            BorrowerSummary {
                id,
                name: name.to_string(),
                email: email.to_string(),
            },
        );
        self
    }

    /// Add an existing loan. Later generated ids continue after the highest seeded one.
    #[must_use]
    pub fn loan(mut self, loan: Loan) -> Self {
        self.state.next_loan_id = self.state.next_loan_id.max(loan.id.get());
        self.state.loans.insert(loan.id, loan);
        self
    }

    /// Finish seeding.
    #[must_use]
    pub fn build(self) -> InMemoryInventoryStore {
        InMemoryInventoryStore {
            state: Arc::new(Mutex::new(self.state)),
            fail_commits: Arc::new(AtomicBool::new(false)),
            failing_applies: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct InMemoryTx {
    guard: OwnedMutexGuard<State>,
    work: State,
    fail_commit: bool,
}

fn active_pair(state: &State, borrower: BorrowerId, item: ItemId) -> usize {
    state
        .loans
        .values()
        .filter(|l| l.borrower_id == borrower && l.item_id == item && l.is_active())
        .count()
}

#[async_trait]
impl InventoryTx for InMemoryTx {
    async fn lock_item(&mut self, id: ItemId) -> Result<Option<Item>, StoreError> {
        Ok(self.work.items.get(&id).cloned())
    }

    async fn count_active_loans(&mut self, borrower: BorrowerId, item: ItemId) -> Result<i64, StoreError> {
        Ok(i64::try_from(active_pair(&self.work, borrower, item)).unwrap_or(i64::MAX))
    }

    async fn decrement_stock_if_positive(&mut self, item: ItemId) -> Result<bool, StoreError> {
        match self.work.items.get_mut(&item) {
            Some(row) if row.stock > 0 => {
                row.stock -= 1;
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn increment_stock(&mut self, item: ItemId) -> Result<(), StoreError> {
        if let Some(row) = self.work.items.get_mut(&item) {
            row.stock += 1;
        }
        Ok(())
    }

    async fn insert_loan(&mut self, loan: NewLoan) -> Result<Loan, StoreError> {
        if active_pair(&self.work, loan.borrower_id, loan.item_id) > 0 {
            return Err(StoreError::Constraint("loans_one_active_per_pair".into()));
        }
        self.work.next_loan_id += 1;
        let row = Loan {
            id: LoanId::new(self.work.next_loan_id),
            borrower_id: loan.borrower_id,
            item_id: loan.item_id,
            loaned_at: loan.loaned_at,
            due_at: loan.due_at,
            returned_at: None,
            status: LoanStatus::Active,
        };
        self.work.loans.insert(row.id, row.clone());
        Ok(row)
    }

    async fn lock_loan(&mut self, id: LoanId) -> Result<Option<Loan>, StoreError> {
        Ok(self.work.loans.get(&id).cloned())
    }

    async fn mark_returned(&mut self, id: LoanId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        match self.work.loans.get_mut(&id) {
            Some(loan) if loan.is_active() => {
                loan.status = LoanStatus::Returned;
                loan.returned_at = Some(at);
                Ok(true)
            },
            _ => Ok(false),
        }
    }

    async fn borrower(&mut self, id: BorrowerId) -> Result<Option<BorrowerSummary>, StoreError> {
        Ok(self.work.borrowers.get(&id).cloned())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let Self {
            mut guard,
            work,
            fail_commit,
        } = *self;
        if fail_commit {
            return Err(StoreError::Unavailable("commit failed (injected)".into()));
        }
        *guard = work;
        Ok(())
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn begin(&self) -> Result<Box<dyn InventoryTx>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(InMemoryTx {
            guard,
            work,
            fail_commit: self.fail_commits.load(Ordering::SeqCst),
        }))
    }

    async fn item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        Ok(self.item_snapshot(id).await)
    }

    async fn loans_for_borrower(&self, borrower: BorrowerId) -> Result<Vec<Loan>, StoreError> {
        let state = self.state.lock().await;
        let mut loans: Vec<Loan> = state
            .loans
            .values()
            .filter(|l| l.borrower_id == borrower)
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.loaned_at.cmp(&a.loaned_at).then(b.id.cmp(&a.id)));
        Ok(loans)
    }

    async fn loan_stats(&self) -> Result<LoanStats, StoreError> {
        let state = self.state.lock().await;
        let mut stats = LoanStats::default();
        for loan in state.loans.values() {
            stats.total_transactions += 1;
            match loan.status {
                LoanStatus::Active => stats.currently_borrowed += 1,
                LoanStatus::Returned => stats.returned_books += 1,
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl ConsumptionStore for InMemoryInventoryStore {
    async fn apply(&self, entry: NewConsumptionEntry) -> Result<ApplyOutcome, StoreError> {
        let injected = self
            .failing_applies
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("apply failed (injected)".into()));
        }

        let mut state = self.state.lock().await;
        let first = state.applied.insert((entry.loan_id, entry.action));
        if first && entry.action == LifecycleAction::Borrowed {
            if let Some(item) = state.items.get_mut(&entry.item_id) {
                item.popularity += 1;
            }
        }
        let id = i64::try_from(state.log.len()).unwrap_or(i64::MAX) + 1;
        state.log.push(ConsumptionEntry {
            id,
            loan_id: entry.loan_id,
            item_id: entry.item_id,
            borrower_id: entry.borrower_id,
            action: entry.action,
            applied: first,
            created_at: entry.received_at,
        });

        Ok(if first {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::AlreadyApplied
        })
    }

    async fn entries_for_loan(&self, loan: LoanId) -> Result<Vec<ConsumptionEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.log.iter().filter(|e| e.loan_id == loan).cloned().collect())
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryInventoryStore {
    async fn record(&self, topic: &str, payload: &[u8], reason: &str) -> Result<(), StoreError> {
        self.state.lock().await.dead_letters.push(DeadLetter {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            reason: reason.to_string(),
        });
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::test_clock;
    use lending_core::environment::Clock;

    fn store() -> InMemoryInventoryStore {
        InMemoryInventoryStore::builder()
            .item(Item::new(ItemId::new(1), "Dune", "Frank Herbert", 1))
            .borrower(BorrowerId::new(7), "Ada", "ada@example.com")
            .build()
    }

    fn new_loan() -> NewLoan {
        let now = test_clock().now();
        NewLoan {
            borrower_id: BorrowerId::new(7),
            item_id: ItemId::new(1),
            loaned_at: now,
            due_at: now + chrono::Duration::days(7),
        }
    }

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = store();
        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx.decrement_stock_if_positive(ItemId::new(1)).await.unwrap());
            tx.insert_loan(new_loan()).await.unwrap();
        }
        assert_eq!(store.item_snapshot(ItemId::new(1)).await.unwrap().stock, 1);
        assert!(store.loans().await.is_empty());
    }

    #[tokio::test]
    async fn commit_persists_changes() {
        let store = store();
        let mut tx = store.begin().await.unwrap();
        tx.decrement_stock_if_positive(ItemId::new(1)).await.unwrap();
        let loan = tx.insert_loan(new_loan()).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(loan.id, LoanId::new(1));
        assert_eq!(store.item_snapshot(ItemId::new(1)).await.unwrap().stock, 0);
        assert_eq!(store.loan_stats().await.unwrap().currently_borrowed, 1);
    }

    #[tokio::test]
    async fn decrement_stops_at_zero() {
        let store = store();
        let mut tx = store.begin().await.unwrap();
        assert!(tx.decrement_stock_if_positive(ItemId::new(1)).await.unwrap());
        assert!(!tx.decrement_stock_if_positive(ItemId::new(1)).await.unwrap());
    }

    #[tokio::test]
    async fn second_active_loan_for_pair_violates_constraint() {
        let store = store();
        let mut tx = store.begin().await.unwrap();
        tx.insert_loan(new_loan()).await.unwrap();
        let err = tx.insert_loan(new_loan()).await.unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));
    }

    #[tokio::test]
    async fn apply_is_effective_once_per_loan_and_action() {
        let store = store();
        let entry = NewConsumptionEntry {
            loan_id: LoanId::new(5),
            item_id: ItemId::new(1),
            borrower_id: BorrowerId::new(7),
            action: LifecycleAction::Borrowed,
            received_at: test_clock().now(),
        };

        assert_eq!(store.apply(entry.clone()).await.unwrap(), ApplyOutcome::Applied);
        assert_eq!(store.apply(entry).await.unwrap(), ApplyOutcome::AlreadyApplied);

        let log = store.entries_for_loan(LoanId::new(5)).await.unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].applied);
        assert!(!log[1].applied);
        assert_eq!(store.item_snapshot(ItemId::new(1)).await.unwrap().popularity, 1);
    }

    #[tokio::test]
    async fn injected_apply_failures_write_nothing() {
        let store = store();
        store.fail_next_applies(1);
        let entry = NewConsumptionEntry {
            loan_id: LoanId::new(5),
            item_id: ItemId::new(1),
            borrower_id: BorrowerId::new(7),
            action: LifecycleAction::Borrowed,
            received_at: test_clock().now(),
        };

        assert!(store.apply(entry.clone()).await.is_err());
        assert!(store.consumption_log().await.is_empty());
        assert_eq!(store.apply(entry).await.unwrap(), ApplyOutcome::Applied);
    }
}
