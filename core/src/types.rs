//! Identifiers and value objects shared by every Seatlock component.
//!
//! Identifiers are small newtypes so that a seat number can never be passed where a
//! concert id is expected. All of them are plain values: `Copy` where the payload allows,
//! `Serialize`/`Deserialize` so adapters can persist them.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::EngineError;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a concert (the unit seats are registered under).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConcertId(u64);

impl ConcertId {
    /// Creates a `ConcertId` from its numeric value
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the numeric value
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConcertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Seat number within a concert.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeatNumber(u32);

impl SeatNumber {
    /// Creates a `SeatNumber`
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Returns the numeric value
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for SeatNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Seat identity: concert plus seat number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SeatId {
    /// Concert the seat belongs to
    pub concert_id: ConcertId,
    /// Seat number inside the concert
    pub seat_number: SeatNumber,
}

impl SeatId {
    /// Creates a `SeatId`
    #[must_use]
    pub const fn new(concert_id: ConcertId, seat_number: SeatNumber) -> Self {
        Self {
            concert_id,
            seat_number,
        }
    }
}

impl fmt::Display for SeatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.concert_id, self.seat_number)
    }
}

/// Maximum length accepted for a user identifier.
pub const MAX_USER_ID_LEN: usize = 50;

/// Opaque identifier of a bidder.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Creates a `UserId` without validation.
    ///
    /// Use [`UserId::parse`] for values coming from outside the process.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Parses and validates a user identifier.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidInput`] if the value is blank or longer than
    /// [`MAX_USER_ID_LEN`] characters.
    pub fn parse(value: &str) -> Result<Self, EngineError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidInput("user id must not be blank".to_string()));
        }
        if trimmed.chars().count() > MAX_USER_ID_LEN {
            return Err(EngineError::InvalidInput(format!(
                "user id must be at most {MAX_USER_ID_LEN} characters"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the identifier as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a reservation
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReservationId(Uuid);

impl ReservationId {
    /// Creates a new random `ReservationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ReservationId` from a `Uuid`
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

impl Default for ReservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a payment
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(Uuid);

impl PaymentId {
    /// Creates a new random `PaymentId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque admission token string handed to a client by the waiting room.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdmissionTokenId(String);

impl AdmissionTokenId {
    /// Generates a fresh, unguessable token
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wraps a token string received from a client
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the token as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdmissionTokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Waiting-room scope. Positions are unique and monotonic within one scope.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueueScope(String);

impl QueueScope {
    /// Creates a scope from an arbitrary name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The waiting room that gates a concert's seats
    #[must_use]
    pub fn for_concert(concert_id: ConcertId) -> Self {
        Self(format!("concert:{concert_id}"))
    }

    /// Returns the scope name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueueScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from dollars with overflow checking
    #[must_use]
    pub const fn checked_from_dollars(dollars: u64) -> Option<Self> {
        match dollars.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Returns the amount in dollars (rounded down)
    #[must_use]
    pub const fn dollars(&self) -> u64 {
        self.0 / 100
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Subtracts two money amounts (returns None if result would be negative)
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        if self.0 >= other.0 {
            Some(Self(self.0 - other.0))
        } else {
            None
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.dollars(), self.0 % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_id_display_joins_concert_and_number() {
        let seat = SeatId::new(ConcertId::new(7), SeatNumber::new(12));
        assert_eq!(seat.to_string(), "7:12");
    }

    #[test]
    fn user_id_parse_rejects_blank_and_long_values() {
        assert!(UserId::parse("   ").is_err());
        assert!(UserId::parse(&"u".repeat(MAX_USER_ID_LEN + 1)).is_err());
        assert_eq!(UserId::parse(" alice ").ok(), Some(UserId::new("alice")));
    }

    #[test]
    fn money_arithmetic_is_checked() {
        let price = Money::from_cents(15_000);
        assert_eq!(price.to_string(), "$150.00");
        assert_eq!(price.checked_sub(Money::from_cents(20_000)), None);
        assert_eq!(
            price.checked_add(Money::from_cents(5)),
            Some(Money::from_cents(15_005))
        );
        assert_eq!(Money::checked_from_dollars(u64::MAX), None);
    }

    #[test]
    fn generated_tokens_are_distinct() {
        assert_ne!(AdmissionTokenId::generate(), AdmissionTokenId::generate());
    }

    #[test]
    fn concert_scope_name() {
        assert_eq!(QueueScope::for_concert(ConcertId::new(3)).as_str(), "concert:3");
    }
}
