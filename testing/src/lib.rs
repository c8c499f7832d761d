//! # Lending Testing
//!
//! Testing utilities for the lending engine.
//!
//! This crate provides:
//! - [`InMemoryInventoryStore`]: items, loans, consumption log and dead letters in memory,
//!   with switches that make commits or applies fail
//! - [`InMemoryEventBus`]: durable consumer groups with ack/nak/term and redelivery
//! - [`FixedClock`]: deterministic time
//!
//! ## Example
//!
//! ```ignore
//! use lending_testing::{InMemoryEventBus, InMemoryInventoryStore, test_clock};
//!
//! let store = InMemoryInventoryStore::builder()
//!     .item(Item::new(ItemId::new(1), "Dune", "Herbert", 1))
//!     .borrower(BorrowerId::new(7), "Ada", "ada@example.com")
//!     .build();
//! let bus = InMemoryEventBus::new();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod event_bus;
pub mod inventory;

use chrono::{DateTime, Utc};
use lending_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use lending_testing::mocks::FixedClock;
    /// use lending_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(20_089))
    }
}

/// Install a test-friendly `tracing` subscriber once per process.
///
/// Honors `RUST_LOG`; output goes through the test harness so it only shows for
/// failing tests or with `--nocapture`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub use event_bus::{InMemoryEventBus, SettledMessage};
pub use inventory::{DeadLetter, InMemoryInventoryStore, InMemoryInventoryStoreBuilder};
pub use mocks::{FixedClock, test_clock};
