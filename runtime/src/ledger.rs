//! Seat ledger: per-seat state, mutated only under the seat's lease.

use chrono::{DateTime, Utc};
use seatlock_core::{
    ConcertId, EngineError, LeaseKey, Money, RepositoryError, Seat, SeatId, SeatNumber,
    SeatRepository, UserId,
};
use std::collections::HashSet;
use std::sync::Arc;

use crate::lock::LeaseGuard;

/// Seat state keeper.
///
/// Reads need no lease. Every mutator takes the [`LeaseGuard`] for the seat's
/// `seat_lock` key and refuses a guard for any other key.
#[derive(Clone)]
pub struct SeatLedger {
    seats: Arc<dyn SeatRepository>,
}

impl SeatLedger {
    /// Creates a ledger over a seat repository
    #[must_use]
    pub fn new(seats: Arc<dyn SeatRepository>) -> Self {
        Self { seats }
    }

    /// Creates the seats of a concert, all AVAILABLE.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidInput`] for an empty list, duplicate seat numbers or seats
    /// that already exist.
    pub async fn register_concert(
        &self,
        concert_id: ConcertId,
        seats: Vec<(SeatNumber, Money)>,
    ) -> Result<Vec<Seat>, EngineError> {
        if seats.is_empty() {
            return Err(EngineError::InvalidInput(format!(
                "concert {concert_id} needs at least one seat"
            )));
        }
        let mut seen = HashSet::new();
        if let Some((number, _)) = seats.iter().find(|(number, _)| !seen.insert(*number)) {
            return Err(EngineError::InvalidInput(format!(
                "seat {number} listed twice for concert {concert_id}"
            )));
        }

        let seats: Vec<Seat> = seats
            .into_iter()
            .map(|(number, price)| Seat::new(SeatId::new(concert_id, number), price))
            .collect();

        match self.seats.insert_many(seats.clone()).await {
            Ok(()) => {
                tracing::info!(concert_id = %concert_id, seats = seats.len(), "Concert registered");
                Ok(seats)
            }
            Err(RepositoryError::Conflict(detail)) => Err(EngineError::InvalidInput(format!(
                "concert {concert_id} already has seats: {detail}"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads a seat.
    ///
    /// # Errors
    ///
    /// [`EngineError::SeatNotFound`] if it does not exist.
    pub async fn seat(&self, seat_id: SeatId) -> Result<Seat, EngineError> {
        self.seats
            .find(seat_id)
            .await?
            .ok_or(EngineError::SeatNotFound(seat_id))
    }

    /// AVAILABLE seats of a concert, by seat number.
    ///
    /// # Errors
    ///
    /// Repository failures.
    pub async fn available_seats(&self, concert_id: ConcertId) -> Result<Vec<Seat>, EngineError> {
        let seats = self.seats.list_by_concert(concert_id).await?;
        Ok(seats.into_iter().filter(Seat::is_available).collect())
    }

    /// AVAILABLE → HELD.
    ///
    /// # Errors
    ///
    /// [`EngineError::SeatNotAvailable`] with the observed status if the seat is not free.
    pub async fn hold(
        &self,
        guard: &LeaseGuard,
        seat_id: SeatId,
        holder: UserId,
        expires_at: DateTime<Utc>,
    ) -> Result<Seat, EngineError> {
        let mut seat = self.load(guard, seat_id).await?;
        if seat.hold(holder, expires_at).is_err() {
            return Err(EngineError::SeatNotAvailable {
                seat_id,
                status: Some(seat.status().kind()),
            });
        }
        self.seats.save(seat.clone()).await?;
        Ok(seat)
    }

    /// HELD → RESERVED for the current holder.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidTransition`] if the seat is not held by `holder` or the hold
    /// window has elapsed.
    pub async fn reserve(
        &self,
        guard: &LeaseGuard,
        seat_id: SeatId,
        holder: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Seat, EngineError> {
        let mut seat = self.load(guard, seat_id).await?;
        seat.confirm(holder, now)?;
        self.seats.save(seat.clone()).await?;
        Ok(seat)
    }

    /// HELD → AVAILABLE.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidTransition`] if the seat is not held.
    pub async fn release(&self, guard: &LeaseGuard, seat_id: SeatId) -> Result<Seat, EngineError> {
        let mut seat = self.load(guard, seat_id).await?;
        seat.release()?;
        self.seats.save(seat.clone()).await?;
        tracing::debug!(seat_id = %seat_id, "Seat released");
        Ok(seat)
    }

    /// Writes back an earlier snapshot of a seat, undoing a transition whose companion
    /// reservation write failed.
    pub(crate) async fn restore(&self, guard: &LeaseGuard, snapshot: Seat) -> Result<(), EngineError> {
        Self::check_guard(guard, snapshot.id())?;
        self.seats.save(snapshot).await?;
        Ok(())
    }

    /// Loads a seat under its lease.
    ///
    /// # Errors
    ///
    /// [`EngineError::SeatNotFound`], or [`EngineError::InvalidInput`] if the guard covers
    /// another key.
    pub async fn load(&self, guard: &LeaseGuard, seat_id: SeatId) -> Result<Seat, EngineError> {
        Self::check_guard(guard, seat_id)?;
        self.seat(seat_id).await
    }

    fn check_guard(guard: &LeaseGuard, seat_id: SeatId) -> Result<(), EngineError> {
        if guard.key() == &LeaseKey::seat(seat_id) {
            Ok(())
        } else {
            Err(EngineError::InvalidInput(format!(
                "lease {} does not cover seat {seat_id}",
                guard.key()
            )))
        }
    }
}
