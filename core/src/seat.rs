//! Seat entity and its hold state machine.
//!
//! A seat's status is a tagged variant: holder and hold expiry only exist inside
//! [`SeatStatus::Held`], so they cannot outlive the hold.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransitionError;
use crate::types::{Money, SeatId, UserId};

/// Current status of a seat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatus {
    /// Free to be held
    Available,
    /// Exclusively held by one user until `expires_at`
    Held {
        /// User holding the seat
        holder: UserId,
        /// Absolute end of the hold window
        expires_at: DateTime<Utc>,
    },
    /// Sold
    Reserved {
        /// When the hold was confirmed
        reserved_at: DateTime<Utc>,
    },
}

impl SeatStatus {
    /// Discriminant without the payload
    #[must_use]
    pub const fn kind(&self) -> SeatStatusKind {
        match self {
            Self::Available => SeatStatusKind::Available,
            Self::Held { .. } => SeatStatusKind::Held,
            Self::Reserved { .. } => SeatStatusKind::Reserved,
        }
    }
}

/// Seat status without its payload, used in error reports and storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatStatusKind {
    /// See [`SeatStatus::Available`]
    Available,
    /// See [`SeatStatus::Held`]
    Held,
    /// See [`SeatStatus::Reserved`]
    Reserved,
}

impl SeatStatusKind {
    /// Stable storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Held => "HELD",
            Self::Reserved => "RESERVED",
        }
    }

    /// Parses a storage name
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "AVAILABLE" => Some(Self::Available),
            "HELD" => Some(Self::Held),
            "RESERVED" => Some(Self::Reserved),
            _ => None,
        }
    }
}

impl fmt::Display for SeatStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A seat of a concert.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    id: SeatId,
    price: Money,
    status: SeatStatus,
}

impl Seat {
    /// Creates an available seat
    #[must_use]
    pub const fn new(id: SeatId, price: Money) -> Self {
        Self {
            id,
            price,
            status: SeatStatus::Available,
        }
    }

    /// Rebuilds a seat from storage
    #[must_use]
    pub const fn restore(id: SeatId, price: Money, status: SeatStatus) -> Self {
        Self { id, price, status }
    }

    /// Seat identity
    #[must_use]
    pub const fn id(&self) -> SeatId {
        self.id
    }

    /// Current price
    #[must_use]
    pub const fn price(&self) -> Money {
        self.price
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> &SeatStatus {
        &self.status
    }

    /// Whether the seat is free
    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self.status, SeatStatus::Available)
    }

    /// Current holder, if held
    #[must_use]
    pub const fn holder(&self) -> Option<&UserId> {
        match &self.status {
            SeatStatus::Held { holder, .. } => Some(holder),
            _ => None,
        }
    }

    /// True when the seat is held and its hold window has elapsed at `now`
    #[must_use]
    pub fn is_hold_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(&self.status, SeatStatus::Held { expires_at, .. } if now >= *expires_at)
    }

    /// AVAILABLE → HELD.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Invalid`] if the seat is not available.
    pub fn hold(&mut self, holder: UserId, expires_at: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.is_available() {
            return Err(self.invalid("HELD"));
        }
        self.status = SeatStatus::Held { holder, expires_at };
        Ok(())
    }

    /// HELD → RESERVED, only for the current holder and before the hold expires.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Invalid`] if the seat is not held,
    /// [`TransitionError::NotHolder`] for another user and [`TransitionError::HoldExpired`]
    /// once the window has passed.
    pub fn confirm(&mut self, holder: &UserId, now: DateTime<Utc>) -> Result<(), TransitionError> {
        match &self.status {
            SeatStatus::Held {
                holder: current,
                expires_at,
            } => {
                if current != holder {
                    return Err(TransitionError::NotHolder);
                }
                if now >= *expires_at {
                    return Err(TransitionError::HoldExpired);
                }
            }
            _ => return Err(self.invalid("RESERVED")),
        }
        self.status = SeatStatus::Reserved { reserved_at: now };
        Ok(())
    }

    /// HELD → AVAILABLE.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Invalid`] if the seat is not held.
    pub fn release(&mut self) -> Result<(), TransitionError> {
        if !matches!(self.status, SeatStatus::Held { .. }) {
            return Err(self.invalid("AVAILABLE"));
        }
        self.status = SeatStatus::Available;
        Ok(())
    }

    const fn invalid(&self, to: &'static str) -> TransitionError {
        TransitionError::Invalid {
            entity: "seat",
            from: self.status.kind().as_str(),
            to,
        }
    }
}
