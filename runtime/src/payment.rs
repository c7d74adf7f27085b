//! Payment coordinator: debit through the balance ledger, then confirm.

use chrono::{DateTime, Utc};
use seatlock_core::environment::Clock;
use seatlock_core::{
    BalanceLedger, EngineError, LeaseHolder, LeaseKey, LockCoordinator, Money, PaymentId,
    ReservationId, UserId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::ReservationEngine;
use crate::lock::try_lease;
use crate::metrics;

/// Proof of a successful payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    /// Payment id
    pub payment_id: PaymentId,
    /// Confirmed reservation
    pub reservation_id: ReservationId,
    /// Amount debited (the reservation's price snapshot)
    pub amount: Money,
    /// Balance after the debit
    pub balance_after: Money,
    /// Confirmation time
    pub paid_at: DateTime<Utc>,
}

/// Orchestrates debit-then-confirm for one reservation.
///
/// A `payment_lock` lease per reservation keeps two concurrent `pay` calls from both
/// debiting. If the confirm step fails after the debit, the debit is refunded.
#[derive(Clone)]
pub struct PaymentCoordinator {
    engine: ReservationEngine,
    balances: Arc<dyn BalanceLedger>,
    locks: Arc<dyn LockCoordinator>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
}

impl PaymentCoordinator {
    /// Creates a coordinator
    #[must_use]
    pub fn new(
        engine: ReservationEngine,
        balances: Arc<dyn BalanceLedger>,
        locks: Arc<dyn LockCoordinator>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            engine,
            balances,
            locks,
            clock,
            config,
        }
    }

    /// Pays for a pending reservation and confirms it.
    ///
    /// On [`EngineError::InsufficientBalance`] nothing changes: the reservation stays
    /// PENDING and the seat stays HELD, so the call can be retried after a top-up.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotReservationOwner`], [`EngineError::ReservationExpired`],
    ///   [`EngineError::ReservationNotPending`] from the pre-checks
    /// - [`EngineError::ConcurrentReservation`] if another payment for the reservation is
    ///   in flight
    /// - [`EngineError::InsufficientBalance`] from the debit
    /// - any confirm failure, after the debit has been refunded
    pub async fn pay(&self, reservation_id: ReservationId, user_id: &UserId) -> Result<PaymentReceipt, EngineError> {
        let result = self.try_pay(reservation_id, user_id).await;
        metrics::record_payment(match &result {
            Ok(_) => "paid",
            Err(EngineError::InsufficientBalance { .. }) => "insufficient_balance",
            Err(EngineError::ReservationExpired { .. }) => "expired",
            Err(EngineError::ConcurrentReservation { .. }) => "contended",
            Err(_) => "error",
        });
        result
    }

    async fn try_pay(&self, reservation_id: ReservationId, user_id: &UserId) -> Result<PaymentReceipt, EngineError> {
        let reservation = self.engine.find(reservation_id).await?;
        if &reservation.user_id != user_id {
            return Err(EngineError::NotReservationOwner(reservation_id));
        }
        ReservationEngine::require_open(&reservation, self.clock.now())?;

        let key = LeaseKey::payment(reservation_id);
        let Some(guard) = try_lease(
            self.locks.as_ref(),
            key.clone(),
            LeaseHolder::for_user(user_id),
            self.config.lease_duration,
            "pay",
        )
        .await?
        else {
            return Err(EngineError::ConcurrentReservation {
                resource: key.to_string(),
                retry_after_seconds: self.config.retry_after_seconds(),
            });
        };

        let result = self.debit_and_confirm(reservation_id, user_id, reservation.price).await;
        guard.release(self.locks.as_ref()).await;
        result
    }

    async fn debit_and_confirm(
        &self,
        reservation_id: ReservationId,
        user_id: &UserId,
        amount: Money,
    ) -> Result<PaymentReceipt, EngineError> {
        let entry = match self.balances.debit(user_id, amount, reservation_id).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(reservation_id = %reservation_id, user_id = %user_id, error = %e, "Debit refused");
                return Err(e.into());
            }
        };

        match self.engine.confirm(reservation_id).await {
            Ok(confirmed) => {
                let receipt = PaymentReceipt {
                    payment_id: PaymentId::new(),
                    reservation_id,
                    amount,
                    balance_after: entry.balance_after,
                    paid_at: confirmed.updated_at,
                };
                tracing::info!(
                    payment_id = %receipt.payment_id,
                    reservation_id = %reservation_id,
                    amount = %amount,
                    balance_after = %receipt.balance_after,
                    "Payment completed"
                );
                Ok(receipt)
            }
            Err(confirm_error) => {
                tracing::warn!(
                    reservation_id = %reservation_id,
                    error = %confirm_error,
                    "Confirm failed after debit, refunding"
                );
                match self.balances.refund(user_id, reservation_id).await {
                    Ok(Some(refund)) => tracing::info!(
                        reservation_id = %reservation_id,
                        amount = %refund.amount,
                        "Debit refunded"
                    ),
                    Ok(None) => tracing::warn!(reservation_id = %reservation_id, "No outstanding debit to refund"),
                    Err(e) => tracing::error!(reservation_id = %reservation_id, error = %e, "Refund failed"),
                }
                Err(confirm_error)
            }
        }
    }
}
