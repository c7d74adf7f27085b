//! Expiry reaper: reclaims lapsed holds and admission tokens.
//!
//! A sweep is idempotent and safe to run from several processes at once. Each
//! reservation is handled under its seat lease and each token under its queue scope's
//! lease; a record whose lease is taken is skipped and picked up by the next sweep.
//! One failing record never stops the batch, and the reservation listing pages past
//! it so that healthy holds behind it are still reclaimed.

use chrono::{DateTime, Utc};
use seatlock_core::environment::Clock;
use seatlock_core::{
    AdmissionTokenId, AdmissionTokenRepository, EngineError, ExpiryCursor, LeaseHolder, LeaseKey,
    LockCoordinator, Notification, Notifier, QueueScope, Reservation, ReservationRepository,
    ReservationStatus, TokenStatus,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::EngineConfig;
use crate::ledger::SeatLedger;
use crate::lock::{LeaseGuard, try_lease};
use crate::metrics;

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Reservations moved to EXPIRED with their seat freed
    pub reservations_expired: usize,
    /// Tokens moved to EXPIRED
    pub tokens_expired: usize,
    /// Records left for a later sweep (lease taken, or settled by a racing request)
    pub skipped: usize,
    /// Records that failed
    pub failed: usize,
}

enum Outcome {
    Reclaimed,
    Skipped,
}

/// Periodic cleaner for lapsed holds and tokens.
#[derive(Clone)]
pub struct ExpiryReaper {
    ledger: SeatLedger,
    reservations: Arc<dyn ReservationRepository>,
    tokens: Arc<dyn AdmissionTokenRepository>,
    locks: Arc<dyn LockCoordinator>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl ExpiryReaper {
    /// Creates a reaper
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

    /// Runs one sweep over reservations and tokens.
    ///
    /// # Errors
    ///
    /// Only a failure to list candidates is returned; per-record failures are counted in
    /// the report.
    pub async fn sweep(&self) -> Result<SweepReport, EngineError> {
        let started = Instant::now();
        let now = self.clock.now();
        let mut report = SweepReport::default();

        self.sweep_reservations(now, &mut report).await?;
        self.sweep_tokens(now, &mut report).await?;

        metrics::record_sweep_duration(started.elapsed());
        if report != SweepReport::default() {
            tracing::info!(
                reservations_expired = report.reservations_expired,
                tokens_expired = report.tokens_expired,
                skipped = report.skipped,
                failed = report.failed,
                "Sweep finished"
            );
        }
        Ok(report)
    }

    /// Reclaims up to `sweep_batch_size` lapsed holds, paging by `(expires_at, id)` past
    /// records that were skipped or failed.
    async fn sweep_reservations(&self, now: DateTime<Utc>, report: &mut SweepReport) -> Result<(), EngineError> {
        let budget = self.config.sweep_batch_size;
        let mut cursor: Option<ExpiryCursor> = None;
        let mut reclaimed = 0;

        while reclaimed < budget {
            let page = self
                .reservations
                .list_expired_pending(now, cursor, budget)
                .await?;
            let exhausted = page.len() < budget;

            for reservation in page {
                if reclaimed == budget {
                    break;
                }
                let id = reservation.id;
                cursor = Some((reservation.expires_at, id));
                match self.expire_reservation(reservation, now).await {
                    Ok(Outcome::Reclaimed) => {
                        reclaimed += 1;
                        report.reservations_expired += 1;
                        metrics::record_sweep_record("reservation", "reclaimed", 1);
                    }
                    Ok(Outcome::Skipped) => {
                        report.skipped += 1;
                        metrics::record_sweep_record("reservation", "skipped", 1);
                    }
                    Err(e) => {
                        tracing::warn!(reservation_id = %id, error = %e, "Failed to expire reservation");
                        report.failed += 1;
                        metrics::record_sweep_record("reservation", "failed", 1);
                    }
                }
            }

            if exhausted {
                break;
            }
        }
        Ok(())
    }

    async fn expire_reservation(&self, reservation: Reservation, now: DateTime<Utc>) -> Result<Outcome, EngineError> {
        let Some(guard) = try_lease(
            self.locks.as_ref(),
            LeaseKey::seat(reservation.seat_id),
            LeaseHolder::background("reaper"),
            self.config.lease_duration,
            "sweep",
        )
        .await?
        else {
            return Ok(Outcome::Skipped);
        };

        let result = self.expire_locked(&guard, reservation, now).await;
        guard.release(self.locks.as_ref()).await;
        result
    }

    async fn expire_locked(
        &self,
        guard: &LeaseGuard,
        reservation: Reservation,
        now: DateTime<Utc>,
    ) -> Result<Outcome, EngineError> {
        // Re-read under the lease: a confirm or cancel may have won the race
        let Some(mut current) = self.reservations.find(reservation.id).await? else {
            return Ok(Outcome::Skipped);
        };
        if current.status != ReservationStatus::Pending || !current.is_expired(now) {
            tracing::debug!(reservation_id = %current.id, status = %current.status, "Reservation settled before sweep");
            return Ok(Outcome::Skipped);
        }

        current.expire(now)?;
        self.reservations.save(current.clone()).await?;

        let seat = self.ledger.load(guard, current.seat_id).await?;
        if seat.holder() == Some(&current.user_id) {
            self.ledger.release(guard, current.seat_id).await?;
        } else {
            tracing::debug!(seat_id = %current.seat_id, "Seat no longer held by expired reservation");
        }

        metrics::record_reservation("expired");
        self.notifier.notify(Notification::ReservationExpired {
            reservation_id: current.id,
            seat_id: current.seat_id,
            user_id: current.user_id.clone(),
        });
        tracing::info!(reservation_id = %current.id, seat_id = %current.seat_id, "Reservation expired");
        Ok(Outcome::Reclaimed)
    }

    async fn sweep_tokens(&self, now: DateTime<Utc>, report: &mut SweepReport) -> Result<(), EngineError> {
        let lapsed = self.tokens.list_lapsed(now, self.config.sweep_batch_size).await?;
        let mut by_scope: BTreeMap<QueueScope, Vec<AdmissionTokenId>> = BTreeMap::new();
        for token in lapsed {
            by_scope.entry(token.scope).or_default().push(token.id);
        }

        let mut expired = 0;
        for (scope, ids) in by_scope {
            // Promotion writes tokens under the same lease
            let lease = try_lease(
                self.locks.as_ref(),
                LeaseKey::queue(&scope),
                LeaseHolder::background("reaper"),
                self.config.lease_duration,
                "sweep",
            )
            .await;
            let guard = match lease {
                Ok(Some(guard)) => guard,
                Ok(None) => {
                    report.skipped += ids.len();
                    metrics::record_sweep_record("token", "skipped", ids.len() as u64);
                    continue;
                }
                Err(e) => {
                    tracing::warn!(scope = %scope, error = %e, "Failed to lease queue for token sweep");
                    report.failed += ids.len();
                    metrics::record_sweep_record("token", "failed", ids.len() as u64);
                    continue;
                }
            };

            for id in ids {
                match self.expire_token(&id, now).await {
                    Ok(Outcome::Reclaimed) => {
                        expired += 1;
                        report.tokens_expired += 1;
                        metrics::record_sweep_record("token", "expired", 1);
                    }
                    Ok(Outcome::Skipped) => {
                        report.skipped += 1;
                        metrics::record_sweep_record("token", "skipped", 1);
                    }
                    Err(e) => {
                        tracing::warn!(token = %id, error = %e, "Failed to expire token");
                        report.failed += 1;
                        metrics::record_sweep_record("token", "failed", 1);
                    }
                }
            }
            guard.release(self.locks.as_ref()).await;
        }

        if expired > 0 {
            metrics::record_token("expired", expired);
        }
        Ok(())
    }

    async fn expire_token(&self, id: &AdmissionTokenId, now: DateTime<Utc>) -> Result<Outcome, EngineError> {
        // Re-read under the queue lease: a promotion may have activated it since listing
        let Some(mut token) = self.tokens.find(id).await? else {
            return Ok(Outcome::Skipped);
        };
        if token.status == TokenStatus::Expired || now < token.expires_at {
            tracing::debug!(token = %token.id, status = %token.status, "Token renewed before sweep");
            return Ok(Outcome::Skipped);
        }

        token.expire()?;
        self.tokens.save(token.clone()).await?;
        tracing::debug!(token = %token.id, scope = %token.scope, "Token expired");
        Ok(Outcome::Reclaimed)
    }
}
