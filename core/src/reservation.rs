//! Reservation entity.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::TransitionError;
use crate::seat::Seat;
use crate::types::{Money, ReservationId, SeatId, UserId};

/// Lifecycle of a reservation. Every status other than `Pending` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Hold granted, awaiting payment
    Pending,
    /// Paid
    Confirmed,
    /// Released by the owner
    Cancelled,
    /// Reclaimed after the hold window elapsed
    Expired,
}

impl ReservationStatus {
    /// Stable storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Confirmed => "CONFIRMED",
            Self::Cancelled => "CANCELLED",
            Self::Expired => "EXPIRED",
        }
    }

    /// Parses a storage name
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "CONFIRMED" => Some(Self::Confirmed),
            "CANCELLED" => Some(Self::Cancelled),
            "EXPIRED" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's claim on a seat, created together with the seat's hold.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation id
    pub id: ReservationId,
    /// Seat being reserved
    pub seat_id: SeatId,
    /// Owner
    pub user_id: UserId,
    /// Price at hold time; never changes afterwards
    pub price: Money,
    /// Current status
    pub status: ReservationStatus,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// End of the hold window
    pub expires_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Creates a pending reservation for `seat`, snapshotting its price.
    #[must_use]
    pub fn new(seat: &Seat, user_id: UserId, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: ReservationId::new(),
            seat_id: seat.id(),
            user_id,
            price: seat.price(),
            status: ReservationStatus::Pending,
            created_at: now,
            expires_at,
            updated_at: now,
        }
    }

    /// Whether the hold window has elapsed at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left in the hold window, zero once elapsed
    #[must_use]
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// PENDING → CONFIRMED, before expiry.
    ///
    /// # Errors
    ///
    /// [`TransitionError::Invalid`] if not pending, [`TransitionError::HoldExpired`] if the
    /// window has elapsed.
    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require_pending(ReservationStatus::Confirmed)?;
        if self.is_expired(now) {
            return Err(TransitionError::HoldExpired);
        }
        self.status = ReservationStatus::Confirmed;
        self.updated_at = now;
        Ok(())
    }

    /// PENDING → CANCELLED.
    ///
    /// # Errors
    ///
    /// [`TransitionError::Invalid`] if not pending.
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require_pending(ReservationStatus::Cancelled)?;
        self.status = ReservationStatus::Cancelled;
        self.updated_at = now;
        Ok(())
    }

    /// PENDING → EXPIRED, only once the window has elapsed.
    ///
    /// # Errors
    ///
    /// [`TransitionError::Invalid`] if not pending, [`TransitionError::NotYetExpired`] before
    /// the deadline.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.require_pending(ReservationStatus::Expired)?;
        if !self.is_expired(now) {
            return Err(TransitionError::NotYetExpired);
        }
        self.status = ReservationStatus::Expired;
        self.updated_at = now;
        Ok(())
    }

    const fn require_pending(&self, to: ReservationStatus) -> Result<(), TransitionError> {
        if matches!(self.status, ReservationStatus::Pending) {
            Ok(())
        } else {
            Err(TransitionError::Invalid {
                entity: "reservation",
                from: self.status.as_str(),
                to: to.as_str(),
            })
        }
    }
}
