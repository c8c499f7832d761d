//! Error taxonomy for the lending engine.
//!
//! Business-rule failures ([`LendingError`] variants other than `Store`) abort the
//! transaction before commit and never reach the event publisher. Infrastructure
//! failures are carried as [`StoreError`] and classified as [`ErrorKind::Internal`].

use crate::types::{BorrowerId, ItemId, LoanId};
use thiserror::Error;

/// Coarse classification of a [`LendingError`], used to pick a transport status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed request
    Validation,
    /// Missing item, loan or borrower
    NotFound,
    /// Business-rule rejection (out of stock, duplicate loan, already returned)
    Conflict,
    /// Loan ownership mismatch
    Forbidden,
    /// Store unavailable or failed
    Internal,
}

/// Errors surfaced by the loan lifecycle operations.
#[derive(Error, Debug)]
pub enum LendingError {
    /// The request itself is malformed
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced record does not exist
    #[error("{resource} {id} not found")]
    NotFound {
        /// Kind of record (`item`, `loan`, `borrower`)
        resource: &'static str,
        /// Identifier that was looked up
        id: i64,
    },

    /// No copies left on the shelf
    #[error("item {item_id} is out of stock")]
    OutOfStock {
        /// Requested item
        item_id: ItemId,
    },

    /// The borrower already holds an active loan for this item
    #[error("duplicate loan: borrower {borrower_id} already has item {item_id}")]
    DuplicateLoan {
        /// Borrower
        borrower_id: BorrowerId,
        /// Item
        item_id: ItemId,
    },

    /// Return requested for a loan that is no longer active
    #[error("loan {loan_id} is already returned")]
    AlreadyReturned {
        /// Loan
        loan_id: LoanId,
    },

    /// The requester does not own the loan
    #[error("loan {loan_id} does not belong to the requester")]
    Forbidden {
        /// Loan
        loan_id: LoanId,
    },

    /// Storage failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LendingError {
    /// Shorthand for a missing item.
    #[must_use]
    pub const fn item_not_found(id: ItemId) -> Self {
        Self::NotFound {
            resource: "item",
            id: id.get(),
        }
    }

    /// Shorthand for a missing loan.
    #[must_use]
    pub const fn loan_not_found(id: LoanId) -> Self {
        Self::NotFound {
            resource: "loan",
            id: id.get(),
        }
    }

    /// Shorthand for a missing borrower.
    #[must_use]
    pub const fn borrower_not_found(id: BorrowerId) -> Self {
        Self::NotFound {
            resource: "borrower",
            id: id.get(),
        }
    }

    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::OutOfStock { .. } | Self::DuplicateLoan { .. } | Self::AlreadyReturned { .. } => {
                ErrorKind::Conflict
            },
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::Store(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-readable code for API responses.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::OutOfStock { .. } => "OUT_OF_STOCK",
            Self::DuplicateLoan { .. } => "DUPLICATE_LOAN",
            Self::AlreadyReturned { .. } => "ALREADY_RETURNED",
            Self::Forbidden { .. } => "FORBIDDEN",
            Self::Store(_) => "INTERNAL_ERROR",
        }
    }
}

/// Errors from the inventory store, consumption log or dead-letter sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store cannot be reached (connection refused, pool exhausted, timeout)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A statement failed
    #[error("query failed: {0}")]
    Query(String),

    /// A uniqueness or check constraint rejected the write
    #[error("constraint violated: {0}")]
    Constraint(String),
}

impl StoreError {
    /// Whether retrying later could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Why a broker payload could not be turned into a lifecycle event.
///
/// Always permanent: the message is terminated, never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventDecodeError {
    /// Not JSON, wrong field types, or a required field is absent
    #[error("malformed event payload: {0}")]
    Malformed(String),

    /// `action` is neither `borrow` nor `return`
    #[error("unknown action '{0}'")]
    UnknownAction(String),

    /// An identifier is zero or negative
    #[error("invalid {field}: {value}")]
    InvalidId {
        /// Wire field name
        field: &'static str,
        /// Value received
        value: i64,
    },

    /// The action does not belong to the topic the message arrived on
    #[error("action '{action}' does not match topic '{topic}'")]
    TopicMismatch {
        /// Topic of the delivery
        topic: String,
        /// Action in the payload
        action: String,
    },
}
