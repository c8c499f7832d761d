//! Domain types for the lending engine.
//!
//! Items carry stock and a popularity counter; loans move through a two-state
//! lifecycle (`Active` → `Returned`) and are never deleted by the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            #[doc = concat!("Create a `", stringify!($name), "` from its database key")]
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the inner database key
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }

            /// Database keys start at 1; zero and negatives never identify a row.
            #[must_use]
            pub const fn is_valid(self) -> bool {
                self.0 > 0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

id_type!(
    /// Identifier of a lendable item (a book in the original catalog)
    ItemId
);
id_type!(
    /// Identifier of a borrower (the authenticated user)
    BorrowerId
);
id_type!(
    /// Identifier of a loan record
    LoanId
);

// ============================================================================
// Items
// ============================================================================

/// A lendable item with its stock and popularity counter.
///
/// `stock` is mutated only by the loan lifecycle; `popularity` only by the
/// counter worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Item identifier
    pub id: ItemId,
    /// Title
    pub title: String,
    /// Author
    pub author: String,
    /// Copies currently on the shelf (never negative)
    pub stock: i32,
    /// Number of applied borrow events
    pub popularity: i64,
}

impl Item {
    /// Create an item with zero popularity.
    #[must_use]
    pub fn new(id: ItemId, title: impl Into<String>, author: impl Into<String>, stock: i32) -> Self {
        Self {
            id,
            title: title.into(),
            author: author.into(),
            stock,
            popularity: 0,
        }
    }

    /// Display subset used when a loan is joined with its item.
    #[must_use]
    pub fn summary(&self) -> ItemSummary {
        ItemSummary {
            id: self.id,
            title: self.title.clone(),
            author: self.author.clone(),
        }
    }
}

/// Item fields shown alongside a loan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSummary {
    /// Item identifier
    pub id: ItemId,
    /// Title
    pub title: String,
    /// Author
    pub author: String,
}

/// Borrower fields shown alongside a loan.
///
/// Borrowers are owned by the user service; the engine only reads them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowerSummary {
    /// Borrower identifier
    pub id: BorrowerId,
    /// Display name
    pub name: String,
    /// Contact email
    pub email: String,
}

// ============================================================================
// Loans
// ============================================================================

/// Loan status. There is no transition out of `Returned`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    /// Item is with the borrower
    Active,
    /// Item is back on the shelf
    Returned,
}

impl LoanStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Returned => "returned",
        }
    }

    /// Parse the storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "returned" => Some(Self::Returned),
            _ => None,
        }
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A loan record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    /// Loan identifier
    pub id: LoanId,
    /// Who borrowed
    pub borrower_id: BorrowerId,
    /// What was borrowed
    pub item_id: ItemId,
    /// When the loan was created
    pub loaned_at: DateTime<Utc>,
    /// When the item is due back
    pub due_at: DateTime<Utc>,
    /// When the item came back, if it has
    pub returned_at: Option<DateTime<Utc>>,
    /// Current status
    pub status: LoanStatus,
}

impl Loan {
    /// Whether the loan is still outstanding.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == LoanStatus::Active
    }
}

/// Fields for a loan about to be inserted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewLoan {
    /// Who is borrowing
    pub borrower_id: BorrowerId,
    /// What is being borrowed
    pub item_id: ItemId,
    /// Loan creation time
    pub loaned_at: DateTime<Utc>,
    /// Due date
    pub due_at: DateTime<Utc>,
}

/// A created loan joined with borrower and item details for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanDetails {
    /// The loan itself
    #[serde(flatten)]
    pub loan: Loan,
    /// Borrowed item
    pub item: ItemSummary,
    /// Borrower
    pub borrower: BorrowerSummary,
}

/// Aggregate counts over all loans.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanStats {
    /// Every loan ever created
    pub total_transactions: i64,
    /// Loans still active
    pub currently_borrowed: i64,
    /// Loans returned
    pub returned_books: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_serialize_as_plain_integers() {
        let json = serde_json::to_string(&ItemId::new(42)).unwrap_or_default();
        assert_eq!(json, "42");
    }

    #[test]
    fn zero_and_negative_ids_are_invalid() {
        assert!(!LoanId::new(0).is_valid());
        assert!(!BorrowerId::new(-3).is_valid());
        assert!(ItemId::new(1).is_valid());
    }

    #[test]
    fn loan_status_storage_names() {
        assert_eq!(LoanStatus::parse("active"), Some(LoanStatus::Active));
        assert_eq!(LoanStatus::parse("returned"), Some(LoanStatus::Returned));
        assert_eq!(LoanStatus::parse("borrowed"), None);
        assert_eq!(LoanStatus::Returned.to_string(), "returned");
    }
}
