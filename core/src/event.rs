//! Lifecycle events and their wire format.
//!
//! A [`LifecycleEvent`] is produced once per committed borrow or return. On the
//! broker it travels as one flat JSON object with pinned field names:
//!
//! ```text
//! {"book_id": 3, "user_id": 7, "loan_id": 42, "action": "borrow", "time": "2025-01-01T00:00:00Z"}
//! ```
//!
//! Decoding is strict. Every field is required, ids must be positive, and no
//! alternative shapes are tried. Unknown extra fields are ignored.

use crate::error::EventDecodeError;
use crate::types::{BorrowerId, ItemId, LoanId, LoanStats};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened to a loan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleAction {
    /// A loan was created
    #[serde(rename = "borrow")]
    Borrowed,
    /// A loan was returned
    #[serde(rename = "return")]
    Returned,
}

impl LifecycleAction {
    /// Wire name (`borrow` / `return`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Borrowed => "borrow",
            Self::Returned => "return",
        }
    }

    /// Parse a wire name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "borrow" => Some(Self::Borrowed),
            "return" => Some(Self::Returned),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topic names used on the broker.
pub struct Topics;

impl Topics {
    /// Borrow events
    pub const BORROWED: &'static str = "book.borrowed";
    /// Return events
    pub const RETURNED: &'static str = "book.returned";
    /// Loan statistics snapshots
    pub const STATS: &'static str = "book.stats";
    /// Every topic above
    pub const ALL: &'static str = "book.*";

    /// Topic a lifecycle action is published to.
    #[must_use]
    pub const fn for_action(action: LifecycleAction) -> &'static str {
        match action {
            LifecycleAction::Borrowed => Self::BORROWED,
            LifecycleAction::Returned => Self::RETURNED,
        }
    }

    /// The two lifecycle topics (stats excluded).
    #[must_use]
    pub fn lifecycle() -> Vec<String> {
        vec![Self::BORROWED.to_string(), Self::RETURNED.to_string()]
    }
}

/// Match a concrete topic against a subscription pattern.
///
/// A pattern ending in `.*` matches any topic that shares the prefix and has at
/// least one more non-empty segment; any other pattern must match exactly.
#[must_use]
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) if prefix.ends_with('.') => {
            topic.len() > prefix.len() && topic.starts_with(prefix)
        },
        _ => pattern == topic,
    }
}

/// An immutable record of a completed borrow or return.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LifecycleEvent {
    /// Borrow or return
    pub action: LifecycleAction,
    /// Item involved
    pub item_id: ItemId,
    /// Borrower involved
    pub borrower_id: BorrowerId,
    /// Loan that changed
    pub loan_id: LoanId,
    /// Commit time of the transition
    pub occurred_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct WireEvent {
    book_id: i64,
    user_id: i64,
    loan_id: i64,
    action: String,
    time: DateTime<Utc>,
}

impl LifecycleEvent {
    /// Build a borrow event.
    #[must_use]
    pub const fn borrowed(
        item_id: ItemId,
        borrower_id: BorrowerId,
        loan_id: LoanId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            action: LifecycleAction::Borrowed,
            item_id,
            borrower_id,
            loan_id,
            occurred_at,
        }
    }

    /// Build a return event.
    #[must_use]
    pub const fn returned(
        item_id: ItemId,
        borrower_id: BorrowerId,
        loan_id: LoanId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            action: LifecycleAction::Returned,
            item_id,
            borrower_id,
            loan_id,
            occurred_at,
        }
    }

    /// Topic this event is published to.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        Topics::for_action(self.action)
    }

    /// Encode to the flat wire payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let wire = WireEvent {
            book_id: self.item_id.get(),
            user_id: self.borrower_id.get(),
            loan_id: self.loan_id.get(),
            action: self.action.as_str().to_string(),
            time: self.occurred_at,
        };
        // A struct of integers, a string and a timestamp always serializes.
        serde_json::to_vec(&wire).unwrap_or_default()
    }

    /// Strictly decode a wire payload.
    ///
    /// # Errors
    ///
    /// Returns [`EventDecodeError`] when the payload is not the pinned flat shape,
    /// names an unknown action, or carries a non-positive id.
    pub fn decode(bytes: &[u8]) -> Result<Self, EventDecodeError> {
        let wire: WireEvent =
            serde_json::from_slice(bytes).map_err(|e| EventDecodeError::Malformed(e.to_string()))?;

        let action = LifecycleAction::parse(&wire.action)
            .ok_or_else(|| EventDecodeError::UnknownAction(wire.action.clone()))?;

        for (field, value) in [
            ("book_id", wire.book_id),
            ("user_id", wire.user_id),
            ("loan_id", wire.loan_id),
        ] {
            if value <= 0 {
                return Err(EventDecodeError::InvalidId { field, value });
            }
        }

        Ok(Self {
            action,
            item_id: ItemId::new(wire.book_id),
            borrower_id: BorrowerId::new(wire.user_id),
            loan_id: LoanId::new(wire.loan_id),
            occurred_at: wire.time,
        })
    }

    /// Decode a payload delivered on `topic`, rejecting actions that belong elsewhere.
    ///
    /// # Errors
    ///
    /// Everything [`decode`](Self::decode) rejects, plus
    /// [`EventDecodeError::TopicMismatch`].
    pub fn decode_from(topic: &str, bytes: &[u8]) -> Result<Self, EventDecodeError> {
        let event = Self::decode(bytes)?;
        if event.topic() != topic {
            return Err(EventDecodeError::TopicMismatch {
                topic: topic.to_string(),
                action: event.action.as_str().to_string(),
            });
        }
        Ok(event)
    }
}

/// Statistics snapshot pushed to live viewers after each transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsUpdate {
    /// Always `STATS_UPDATE`
    #[serde(rename = "type")]
    pub kind: String,
    /// Counts at the time of the snapshot
    pub data: LoanStats,
    /// Snapshot time
    pub time: DateTime<Utc>,
}

impl StatsUpdate {
    /// Message type tag on the wire
    pub const KIND: &'static str = "STATS_UPDATE";

    /// Wrap a snapshot.
    #[must_use]
    pub fn new(data: LoanStats, time: DateTime<Utc>) -> Self {
        Self {
            kind: Self::KIND.to_string(),
            data,
            time,
        }
    }

    /// Encode for the stats topic.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn encodes_the_flat_shape() {
        let event = LifecycleEvent::borrowed(ItemId::new(3), BorrowerId::new(7), LoanId::new(42), at());
        let value: serde_json::Value = serde_json::from_slice(&event.encode()).unwrap();

        assert_eq!(value["book_id"], 3);
        assert_eq!(value["user_id"], 7);
        assert_eq!(value["loan_id"], 42);
        assert_eq!(value["action"], "borrow");
        assert_eq!(value["time"], "2025-01-01T00:00:00Z");
        assert_eq!(value.as_object().unwrap().len(), 5);
    }

    #[test]
    fn decode_ignores_extra_fields() {
        let raw = br#"{"book_id":1,"user_id":2,"loan_id":3,"action":"return","time":"2025-01-01T00:00:00Z","source":"api"}"#;
        let event = LifecycleEvent::decode(raw).unwrap();
        assert_eq!(event.action, LifecycleAction::Returned);
        assert_eq!(event.loan_id, LoanId::new(3));
    }

    #[test]
    fn decode_rejects_missing_fields() {
        let raw = br#"{"book_id":1,"user_id":2,"action":"borrow","time":"2025-01-01T00:00:00Z"}"#;
        assert!(matches!(
            LifecycleEvent::decode(raw),
            Err(EventDecodeError::Malformed(_))
        ));
    }

    #[test]
    fn decode_rejects_enveloped_payloads() {
        let raw = br#"{"type":"book.borrowed","data":{"book_id":1,"user_id":2,"loan_id":3,"action":"borrow","time":"2025-01-01T00:00:00Z"}}"#;
        assert!(LifecycleEvent::decode(raw).is_err());
    }

    #[test]
    fn decode_rejects_zero_ids() {
        let raw = br#"{"book_id":0,"user_id":2,"loan_id":3,"action":"borrow","time":"2025-01-01T00:00:00Z"}"#;
        assert_eq!(
            LifecycleEvent::decode(raw),
            Err(EventDecodeError::InvalidId { field: "book_id", value: 0 })
        );
    }

    #[test]
    fn decode_rejects_unknown_action() {
        let raw = br#"{"book_id":1,"user_id":2,"loan_id":3,"action":"renew","time":"2025-01-01T00:00:00Z"}"#;
        assert_eq!(
            LifecycleEvent::decode(raw),
            Err(EventDecodeError::UnknownAction("renew".into()))
        );
    }

    #[test]
    fn decode_from_checks_topic() {
        let event = LifecycleEvent::returned(ItemId::new(1), BorrowerId::new(2), LoanId::new(3), at());
        let bytes = event.encode();

        assert!(LifecycleEvent::decode_from(Topics::RETURNED, &bytes).is_ok());
        assert!(matches!(
            LifecycleEvent::decode_from(Topics::BORROWED, &bytes),
            Err(EventDecodeError::TopicMismatch { .. })
        ));
    }

    #[test]
    fn wildcard_topics() {
        assert!(topic_matches("book.*", "book.borrowed"));
        assert!(topic_matches("book.*", "book.stats"));
        assert!(!topic_matches("book.*", "book."));
        assert!(!topic_matches("book.*", "books.borrowed"));
        assert!(topic_matches("book.returned", "book.returned"));
        assert!(!topic_matches("book.returned", "book.borrowed"));
    }

    #[test]
    fn stats_update_shape() {
        let update = StatsUpdate::new(
            LoanStats {
                total_transactions: 3,
                currently_borrowed: 1,
                returned_books: 2,
            },
            at(),
        );
        let value: serde_json::Value = serde_json::from_slice(&update.encode()).unwrap();
        assert_eq!(value["type"], "STATS_UPDATE");
        assert_eq!(value["data"]["currently_borrowed"], 1);
    }

    proptest! {
        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = LifecycleEvent::decode(&bytes);
        }

        #[test]
        fn positive_ids_survive_the_wire(
            item in 1..i64::MAX,
            borrower in 1..i64::MAX,
            loan in 1..i64::MAX,
            borrowed in any::<bool>(),
            secs in 0..4_102_444_800_i64,
        ) {
            let time = Utc.timestamp_opt(secs, 0).unwrap();
            let ids = (ItemId::new(item), BorrowerId::new(borrower), LoanId::new(loan));
            let event = if borrowed {
                LifecycleEvent::borrowed(ids.0, ids.1, ids.2, time)
            } else {
                LifecycleEvent::returned(ids.0, ids.1, ids.2, time)
            };
            let decoded = LifecycleEvent::decode_from(event.topic(), &event.encode()).unwrap();
            prop_assert_eq!(decoded, event);
        }
    }
}
