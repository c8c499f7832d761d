//! # Lending Runtime
//!
//! The moving parts of the lending engine.
//!
//! ## Core Components
//!
//! - [`LoanManager`]: borrow/return as one store transaction each
//! - [`EventPublisher`]: detached, time-bounded publish of lifecycle events and stats
//! - [`CounterWorker`]: durable consumer maintaining popularity and the consumption log
//! - [`LiveHub`] / [`HubRelay`]: single-task fan-out to live viewers
//! - [`EventConsumer`]: subscribe-process-reconnect loop driving the worker and the relay
//!
//! ## Example
//!
//! ```ignore
//! use lending_runtime::{EventPublisher, LoanManager};
//!
//! let publisher = EventPublisher::new(bus, clock.clone()).with_stats_from(store.clone());
//! let loans = LoanManager::new(store, publisher, clock);
//!
//! let details = loans.borrow(BorrowerId::new(7), ItemId::new(1)).await?;
//! loans.return_loan(details.loan.id, BorrowerId::new(7)).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod consumer;
pub mod hub;
pub mod manager;
pub mod metrics;
pub mod publisher;
pub mod retry;
pub mod worker;

pub use consumer::{DeliveryHandler, EventConsumer};
pub use hub::{HubClosed, HubConfig, HubRelay, LiveClient, LiveHub};
pub use manager::LoanManager;
pub use publisher::EventPublisher;
pub use retry::{RetryPolicy, retry_with_backoff};
pub use worker::{CounterWorker, Disposition};
