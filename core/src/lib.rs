//! # Lending Core
//!
//! Domain types and contracts for the lending transaction engine.
//!
//! The engine turns a patron's borrow or return into one atomic change against the
//! inventory store, then fans a [`LifecycleEvent`](event::LifecycleEvent) out to
//! asynchronous consumers:
//!
//! ```text
//! request ──► LoanManager ──(commit)──► EventPublisher ──► EventBus
//!                                                            │
//!                                          ┌─────────────────┴────────────────┐
//!                                          ▼                                  ▼
//!                                   CounterWorker                        LiveHub relay
//!                                (durable, ack/nak)                (best effort, fan-out)
//! ```
//!
//! This crate holds only the vocabulary shared by every other crate:
//!
//! - [`types`]: identifiers, items, loans and their statuses
//! - [`event`]: the lifecycle event and its pinned wire format
//! - [`error`]: the error taxonomy surfaced to callers
//! - [`store`]: inventory, consumption log and dead-letter contracts
//! - [`event_bus`]: publish/subscribe with manual acknowledgement
//! - [`environment`]: injectable clock

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod event;
pub mod event_bus;
pub mod store;
pub mod types;

/// Environment traits that keep time out of business logic.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Example
    ///
    /// ```
    /// use chrono::{DateTime, Utc};
    /// use lending_core::environment::Clock;
    ///
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use environment::{Clock, SystemClock};
pub use error::{ErrorKind, EventDecodeError, LendingError, StoreError};
pub use event::{LifecycleAction, LifecycleEvent, StatsUpdate, Topics, topic_matches};
pub use event_bus::{Delivery, DeliveryStream, EventBus, EventBusError, Settlement, Subscription};
pub use store::{
    ApplyOutcome, ConsumptionEntry, ConsumptionStore, DeadLetterSink, InventoryStore, InventoryTx,
    NewConsumptionEntry,
};
pub use types::{
    BorrowerId, BorrowerSummary, Item, ItemId, ItemSummary, Loan, LoanDetails, LoanId, LoanStats,
    LoanStatus, NewLoan,
};
