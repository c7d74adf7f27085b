//! Reservation engine: hold, confirm and cancel under the seat lease.
//!
//! # Flow
//!
//! ```text
//! hold:    token valid? ─▶ lease seat ─▶ seat AVAILABLE→HELD ─▶ PENDING reservation ─▶ release
//! confirm: lease seat ─▶ still PENDING and unexpired? ─▶ seat HELD→RESERVED ─▶ CONFIRMED ─▶ release
//! cancel:  owner? ─▶ lease seat ─▶ CANCELLED ─▶ seat HELD→AVAILABLE ─▶ release
//! ```
//!
//! Nothing here waits for a lease: contention surfaces immediately as
//! `SeatNotAvailable` (hold) or `ConcurrentReservation` (confirm, cancel).
//!
//! # Confirm versus expiry
//!
//! The reservation's `expires_at` is authoritative. Confirm and the reaper both
//! re-read the reservation under the seat lease; whichever takes the lease first
//! wins, and a confirm that runs after the deadline fails with `ReservationExpired`
//! even when the reaper has not swept the record yet.

use chrono::{DateTime, Duration, Utc};
use seatlock_core::environment::Clock;
use seatlock_core::{
    AdmissionTokenId, AdmissionTokenRepository, EngineError, LeaseHolder, LeaseKey,
    LockCoordinator, Notification, Notifier, QueueScope, Reservation, ReservationId,
    ReservationRepository, ReservationStatus, SeatId, TransitionError, UserId,
};
use std::sync::Arc;

use crate::config::{EngineConfig, chrono_duration};
use crate::ledger::SeatLedger;
use crate::lock::{LeaseGuard, try_lease};
use crate::metrics;

/// A reservation together with the time left on its hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationView {
    /// The stored reservation
    pub reservation: Reservation,
    /// Remaining hold time; zero once elapsed or when no longer pending
    pub remaining: Duration,
}

/// Seat hold and reservation orchestrator.
#[derive(Clone)]
pub struct ReservationEngine {
    ledger: SeatLedger,
    reservations: Arc<dyn ReservationRepository>,
    tokens: Arc<dyn AdmissionTokenRepository>,
    locks: Arc<dyn LockCoordinator>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl ReservationEngine {
    /// Creates an engine
    #[must_use]
    pub fn new(
        ledger: SeatLedger,
        reservations: Arc<dyn ReservationRepository>,
        tokens: Arc<dyn AdmissionTokenRepository>,
        locks: Arc<dyn LockCoordinator>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            reservations,
            tokens,
            locks,
            notifier,
            clock,
            config,
        }
    }

    /// The seat ledger the engine mutates
    #[must_use]
    pub const fn ledger(&self) -> &SeatLedger {
        &self.ledger
    }

    /// Puts `seat_id` on hold for `user_id`.
    ///
    /// The token must be ACTIVE, unexpired, owned by the user and issued for the seat's
    /// concert. A seat whose previous hold has lapsed is reclaimed on the spot.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AdmissionRequired`]: no valid token
    /// - [`EngineError::SeatNotFound`]: unknown seat
    /// - [`EngineError::SeatNotAvailable`]: the seat is held, reserved or being mutated by
    ///   another request (`status: None`)
    pub async fn hold(
        &self,
        token_id: &AdmissionTokenId,
        user_id: &UserId,
        seat_id: SeatId,
    ) -> Result<Reservation, EngineError> {
        let result = self.try_hold(token_id, user_id, seat_id).await;
        metrics::record_hold(match &result {
            Ok(_) => "held",
            Err(EngineError::SeatNotAvailable { status: None, .. }) => "contended",
            Err(EngineError::SeatNotAvailable { .. }) => "not_available",
            Err(EngineError::AdmissionRequired) => "admission_required",
            Err(_) => "error",
        });
        result
    }

    async fn try_hold(
        &self,
        token_id: &AdmissionTokenId,
        user_id: &UserId,
        seat_id: SeatId,
    ) -> Result<Reservation, EngineError> {
        self.check_admission(token_id, user_id, seat_id).await?;
        // Fail fast on unknown seats before taking a lease
        self.ledger.seat(seat_id).await?;

        let Some(guard) = try_lease(
            self.locks.as_ref(),
            LeaseKey::seat(seat_id),
            LeaseHolder::for_user(user_id),
            self.config.lease_duration,
            "hold",
        )
        .await?
        else {
            return Err(EngineError::SeatNotAvailable {
                seat_id,
                status: None,
            });
        };

        let result = self.hold_locked(&guard, user_id, seat_id).await;
        guard.release(self.locks.as_ref()).await;

        let reservation = result?;
        tracing::info!(
            reservation_id = %reservation.id,
            seat_id = %seat_id,
            user_id = %user_id,
            expires_at = %reservation.expires_at,
            "Seat held"
        );
        metrics::record_reservation("pending");
        self.notifier.notify(Notification::SeatHeld {
            reservation_id: reservation.id,
            seat_id,
            user_id: user_id.clone(),
        });
        Ok(reservation)
    }

    async fn check_admission(
        &self,
        token_id: &AdmissionTokenId,
        user_id: &UserId,
        seat_id: SeatId,
    ) -> Result<(), EngineError> {
        let now = self.clock.now();
        let admitted = self.tokens.find(token_id).await?.is_some_and(|token| {
            token.is_valid(now)
                && &token.user_id == user_id
                && token.scope == QueueScope::for_concert(seat_id.concert_id)
        });
        if admitted {
            Ok(())
        } else {
            tracing::warn!(user_id = %user_id, seat_id = %seat_id, "Hold without valid admission");
            Err(EngineError::AdmissionRequired)
        }
    }

    async fn hold_locked(
        &self,
        guard: &LeaseGuard,
        user_id: &UserId,
        seat_id: SeatId,
    ) -> Result<Reservation, EngineError> {
        let now = self.clock.now();
        let seat = self.ledger.load(guard, seat_id).await?;
        if seat.is_hold_expired(now) {
            self.reclaim_locked(guard, seat_id, now).await?;
        }

        let expires_at = now + chrono_duration(self.config.hold_window);
        let seat = self.ledger.hold(guard, seat_id, user_id.clone(), expires_at).await?;
        let reservation = Reservation::new(&seat, user_id.clone(), now, expires_at);

        if let Err(e) = self.reservations.insert(reservation.clone()).await {
            tracing::error!(seat_id = %seat_id, error = %e, "Reservation insert failed, releasing seat");
            if let Err(undo) = self.ledger.release(guard, seat_id).await {
                tracing::error!(seat_id = %seat_id, error = %undo, "Failed to release seat after insert failure");
            }
            return Err(e.into());
        }
        Ok(reservation)
    }

    /// Expires the lapsed hold on a seat found during `hold`.
    async fn reclaim_locked(
        &self,
        guard: &LeaseGuard,
        seat_id: SeatId,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        if let Some(mut stale) = self.reservations.find_pending_for_seat(seat_id).await? {
            stale.expire(now)?;
            self.reservations.save(stale.clone()).await?;
            metrics::record_reservation("expired");
            self.notifier.notify(Notification::ReservationExpired {
                reservation_id: stale.id,
                seat_id,
                user_id: stale.user_id.clone(),
            });
            tracing::info!(reservation_id = %stale.id, seat_id = %seat_id, "Lapsed hold reclaimed on demand");
        }
        self.ledger.release(guard, seat_id).await?;
        Ok(())
    }

    /// Confirms a pending reservation: seat HELD → RESERVED, reservation → CONFIRMED.
    ///
    /// Callers debit first and confirm second.
    ///
    /// # Errors
    ///
    /// - [`EngineError::ReservationExpired`]: the hold window has elapsed
    /// - [`EngineError::ReservationNotPending`]: already confirmed or cancelled
    /// - [`EngineError::ConcurrentReservation`]: the seat lease is taken
    pub async fn confirm(&self, reservation_id: ReservationId) -> Result<Reservation, EngineError> {
        let reservation = self.find(reservation_id).await?;
        Self::require_open(&reservation, self.clock.now())?;

        let guard = self.lease_for(&reservation, "confirm").await?;
        let result = self.confirm_locked(&guard, reservation_id).await;
        guard.release(self.locks.as_ref()).await;

        let confirmed = result?;
        tracing::info!(
            reservation_id = %confirmed.id,
            seat_id = %confirmed.seat_id,
            user_id = %confirmed.user_id,
            "Reservation confirmed"
        );
        metrics::record_reservation("confirmed");
        self.notifier.notify(Notification::ReservationConfirmed {
            reservation_id: confirmed.id,
            seat_id: confirmed.seat_id,
            user_id: confirmed.user_id.clone(),
        });
        Ok(confirmed)
    }

    async fn confirm_locked(
        &self,
        guard: &LeaseGuard,
        reservation_id: ReservationId,
    ) -> Result<Reservation, EngineError> {
        let mut reservation = self.find(reservation_id).await?;
        let now = self.clock.now();
        Self::require_open(&reservation, now)?;

        let before = self.ledger.load(guard, reservation.seat_id).await?;
        match self
            .ledger
            .reserve(guard, reservation.seat_id, &reservation.user_id, now)
            .await
        {
            Ok(_) => {}
            Err(EngineError::InvalidTransition(TransitionError::HoldExpired)) => {
                return Err(EngineError::ReservationExpired { reservation_id });
            }
            Err(e) => return Err(e),
        }

        reservation.confirm(now)?;
        if let Err(e) = self.reservations.save(reservation.clone()).await {
            tracing::error!(reservation_id = %reservation_id, error = %e, "Reservation save failed, restoring seat");
            if let Err(undo) = self.ledger.restore(guard, before).await {
                tracing::error!(reservation_id = %reservation_id, error = %undo, "Failed to restore seat");
            }
            return Err(e.into());
        }
        Ok(reservation)
    }

    /// Cancels the caller's pending reservation and frees the seat.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotReservationOwner`]: another user's reservation
    /// - [`EngineError::ReservationNotPending`]: already confirmed, cancelled or expired
    /// - [`EngineError::ConcurrentReservation`]: the seat lease is taken
    pub async fn cancel(&self, reservation_id: ReservationId, user_id: &UserId) -> Result<Reservation, EngineError> {
        let reservation = self.find(reservation_id).await?;
        if &reservation.user_id != user_id {
            return Err(EngineError::NotReservationOwner(reservation_id));
        }
        Self::require_pending(&reservation)?;

        let guard = self.lease_for(&reservation, "cancel").await?;
        let result = self.cancel_locked(&guard, reservation_id).await;
        guard.release(self.locks.as_ref()).await;

        let cancelled = result?;
        tracing::info!(
            reservation_id = %cancelled.id,
            seat_id = %cancelled.seat_id,
            user_id = %cancelled.user_id,
            "Reservation cancelled"
        );
        metrics::record_reservation("cancelled");
        self.notifier.notify(Notification::ReservationCancelled {
            reservation_id: cancelled.id,
            seat_id: cancelled.seat_id,
            user_id: cancelled.user_id.clone(),
        });
        Ok(cancelled)
    }

    async fn cancel_locked(
        &self,
        guard: &LeaseGuard,
        reservation_id: ReservationId,
    ) -> Result<Reservation, EngineError> {
        let mut reservation = self.find(reservation_id).await?;
        Self::require_pending(&reservation)?;

        reservation.cancel(self.clock.now())?;
        self.reservations.save(reservation.clone()).await?;
        self.ledger.release(guard, reservation.seat_id).await?;
        Ok(reservation)
    }

    /// Loads a reservation with its remaining hold time.
    ///
    /// # Errors
    ///
    /// [`EngineError::ReservationNotFound`] for an unknown id.
    pub async fn reservation(&self, reservation_id: ReservationId) -> Result<ReservationView, EngineError> {
        let reservation = self.find(reservation_id).await?;
        let remaining = if reservation.status == ReservationStatus::Pending {
            reservation.remaining(self.clock.now())
        } else {
            Duration::zero()
        };
        Ok(ReservationView {
            reservation,
            remaining,
        })
    }

    pub(crate) async fn find(&self, reservation_id: ReservationId) -> Result<Reservation, EngineError> {
        self.reservations
            .find(reservation_id)
            .await?
            .ok_or(EngineError::ReservationNotFound(reservation_id))
    }

    async fn lease_for(&self, reservation: &Reservation, operation: &'static str) -> Result<LeaseGuard, EngineError> {
        try_lease(
            self.locks.as_ref(),
            LeaseKey::seat(reservation.seat_id),
            LeaseHolder::for_user(&reservation.user_id),
            self.config.lease_duration,
            operation,
        )
        .await?
        .ok_or_else(|| EngineError::ConcurrentReservation {
            resource: LeaseKey::seat(reservation.seat_id).to_string(),
            retry_after_seconds: self.config.retry_after_seconds(),
        })
    }

    /// PENDING and inside the hold window.
    pub(crate) fn require_open(reservation: &Reservation, now: DateTime<Utc>) -> Result<(), EngineError> {
        match reservation.status {
            ReservationStatus::Expired => Err(EngineError::ReservationExpired {
                reservation_id: reservation.id,
            }),
            ReservationStatus::Pending if reservation.is_expired(now) => {
                Err(EngineError::ReservationExpired {
                    reservation_id: reservation.id,
                })
            }
            _ => Self::require_pending(reservation),
        }
    }

    const fn require_pending(reservation: &Reservation) -> Result<(), EngineError> {
        match reservation.status {
            ReservationStatus::Pending => Ok(()),
            status => Err(EngineError::ReservationNotPending {
                reservation_id: reservation.id,
                status,
            }),
        }
    }
}
