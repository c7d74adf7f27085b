//! Lease abstraction: the only serialization primitive in the engine.
//!
//! A lease is a short-lived, self-expiring exclusive grant on a resource key. Every
//! seat mutation happens while the caller holds that seat's lease, which makes the
//! engine correct across processes as long as the backend honours this contract:
//!
//! - `acquire` never blocks: it returns `false` immediately on contention
//! - a lease disappears on its own after its duration
//! - `release` only removes a lease owned by the caller
//!
//! Besides seats, leases also serialize payment attempts per reservation and promotion
//! passes per queue scope.
//!
//! # Implementations
//!
//! - `LocalLockCoordinator` (in `seatlock-runtime`): in-process map, for single-node use and tests
//! - `PostgresLockCoordinator` (in `seatlock-postgres`): lease table with conditional upsert
//! - `RedisLockCoordinator` (in `seatlock-redis`): `SET NX PX` plus a compare-and-delete script

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use uuid::Uuid;

use crate::error::LeaseError;
use crate::types::{QueueScope, ReservationId, SeatId, UserId};

/// Counter of lease acquisitions, labelled by `backend` and `granted`.
pub const LEASE_ACQUIRE_METRIC: &str = "seatlock_lease_acquire_total";

/// Key of a leased resource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseKey(String);

impl LeaseKey {
    /// Lease guarding a seat and its pending reservation: `seat_lock:{concert}:{seat}`
    #[must_use]
    pub fn seat(seat_id: SeatId) -> Self {
        Self(format!(
            "seat_lock:{}:{}",
            seat_id.concert_id, seat_id.seat_number
        ))
    }

    /// Lease guarding a payment attempt: `payment_lock:{reservation}`
    #[must_use]
    pub fn payment(reservation_id: ReservationId) -> Self {
        Self(format!("payment_lock:{reservation_id}"))
    }

    /// Lease serializing promotion passes of one queue scope: `queue_lock:{scope}`
    #[must_use]
    pub fn queue(scope: &QueueScope) -> Self {
        Self(format!("queue_lock:{scope}"))
    }

    /// Key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a lease owner. Each acquisition attempt uses a fresh holder so that
/// a stale release from an earlier request can never free a newer lease.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseHolder(String);

impl LeaseHolder {
    /// Holder for a request made on behalf of `user`
    #[must_use]
    pub fn for_user(user: &UserId) -> Self {
        Self(format!("{user}:{}", Uuid::new_v4().simple()))
    }

    /// Holder for a background pass such as `reaper` or `promoter`
    #[must_use]
    pub fn background(task: &str) -> Self {
        Self(format!("{task}:{}", Uuid::new_v4().simple()))
    }

    /// Wraps an existing holder string (used by storage adapters)
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Holder as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Grants short-lived exclusive leases keyed by resource.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the coordinator can be shared as
/// `Arc<dyn LockCoordinator>` between the engine components.
pub trait LockCoordinator: Send + Sync {
    /// Grants the lease iff no unexpired lease exists for `key`.
    ///
    /// Returns `Ok(false)` immediately on contention.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Backend`] if the backend fails.
    fn acquire<'a>(
        &'a self,
        key: &'a LeaseKey,
        holder: &'a LeaseHolder,
        lease: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<bool, LeaseError>> + Send + 'a>>;

    /// Releases the lease if `holder` currently owns it.
    ///
    /// Returns whether a lease was removed. Releasing a lease owned by someone else, or
    /// one that already expired, is a no-op returning `Ok(false)`.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Backend`] if the backend fails.
    fn release<'a>(
        &'a self,
        key: &'a LeaseKey,
        holder: &'a LeaseHolder,
    ) -> Pin<Box<dyn Future<Output = Result<bool, LeaseError>> + Send + 'a>>;
}
