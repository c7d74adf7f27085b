//! Balance ledger collaborator.
//!
//! The engine does not do bookkeeping. It only needs an atomic debit that either
//! succeeds with a non-negative resulting balance or fails with
//! [`LedgerError::InsufficientBalance`]. Every balance change appends one immutable
//! [`LedgerEntry`] recording the resulting balance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::types::{Money, ReservationId, UserId};

/// Unique identifier for a ledger entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerEntryId(Uuid);

impl LedgerEntryId {
    /// Creates a new random `LedgerEntryId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `LedgerEntryId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LedgerEntryId {
    fn default() -> Self {
        Self::new()
    }
}

/// Kind of balance movement.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    /// Top-up
    Charge,
    /// Debit for a reservation
    Payment,
    /// Credit reversing a payment
    Refund,
}

impl EntryKind {
    /// Stable storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Charge => "CHARGE",
            Self::Payment => "PAYMENT",
            Self::Refund => "REFUND",
        }
    }

    /// Parses a storage name
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "CHARGE" => Some(Self::Charge),
            "PAYMENT" => Some(Self::Payment),
            "REFUND" => Some(Self::Refund),
            _ => None,
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable balance movement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry id
    pub id: LedgerEntryId,
    /// Account owner
    pub user_id: UserId,
    /// Movement kind
    pub kind: EntryKind,
    /// Amount moved (always positive; direction follows from `kind`)
    pub amount: Money,
    /// Balance after this entry
    pub balance_after: Money,
    /// Reservation the movement belongs to, for payments and refunds
    pub reference: Option<ReservationId>,
    /// Time of the movement
    pub created_at: DateTime<Utc>,
}

/// Counter of appended ledger entries, labelled by `kind`.
pub const LEDGER_ENTRIES_METRIC: &str = "seatlock_ledger_entries_total";

/// Boxed future returned by ledger methods.
pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LedgerError>> + Send + 'a>>;

/// External balance ledger.
///
/// # Idempotency
///
/// `debit` and `refund` are keyed by reservation id. Repeating a `debit` for a reservation
/// whose payment is already recorded (and not refunded) returns the recorded entry
/// without moving money again; repeating a `refund` is a no-op returning `None`.
pub trait BalanceLedger: Send + Sync {
    /// Current balance; zero for unknown users.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Storage`] on backend failure.
    fn balance<'a>(&'a self, user_id: &'a UserId) -> LedgerFuture<'a, Money>;

    /// Adds funds.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Overflow`] if the balance would overflow.
    fn charge<'a>(&'a self, user_id: &'a UserId, amount: Money) -> LedgerFuture<'a, LedgerEntry>;

    /// Atomically debits `amount` for `reservation_id`.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InsufficientBalance`] if the balance would go negative; the balance is
    /// unchanged then.
    fn debit<'a>(
        &'a self,
        user_id: &'a UserId,
        amount: Money,
        reservation_id: ReservationId,
    ) -> LedgerFuture<'a, LedgerEntry>;

    /// Reverses the outstanding payment of `reservation_id`, if there is one.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Storage`] on backend failure.
    fn refund<'a>(
        &'a self,
        user_id: &'a UserId,
        reservation_id: ReservationId,
    ) -> LedgerFuture<'a, Option<LedgerEntry>>;

    /// All entries of a user, oldest first.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Storage`] on backend failure.
    fn entries<'a>(&'a self, user_id: &'a UserId) -> LedgerFuture<'a, Vec<LedgerEntry>>;
}
