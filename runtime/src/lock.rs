//! In-process lease coordinator and the lease guard used by every engine component.

use chrono::{DateTime, Utc};
use seatlock_core::environment::Clock;
use seatlock_core::{LeaseError, LeaseHolder, LeaseKey, LockCoordinator};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::chrono_duration;
use crate::metrics;

/// Lease coordinator backed by a process-local map.
///
/// Leases expire against the injected [`Clock`], so tests driving a manual clock can
/// let a lease lapse without sleeping. Only correct within one process; use the
/// Postgres or Redis coordinators when several engine instances share state.
pub struct LocalLockCoordinator {
    clock: Arc<dyn Clock>,
    leases: Mutex<HashMap<LeaseKey, (LeaseHolder, DateTime<Utc>)>>,
}

impl LocalLockCoordinator {
    /// Creates an empty coordinator
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            leases: Mutex::new(HashMap::new()),
        }
    }

    fn try_acquire(&self, key: &LeaseKey, holder: &LeaseHolder, lease: Duration) -> bool {
        let now = self.clock.now();
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        match leases.get(key) {
            Some((_, expires_at)) if *expires_at > now => false,
            _ => {
                leases.insert(key.clone(), (holder.clone(), now + chrono_duration(lease)));
                true
            }
        }
    }

    fn try_release(&self, key: &LeaseKey, holder: &LeaseHolder) -> bool {
        let now = self.clock.now();
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        match leases.get(key) {
            Some((owner, expires_at)) if owner == holder => {
                let live = *expires_at > now;
                leases.remove(key);
                live
            }
            _ => false,
        }
    }
}

impl LockCoordinator for LocalLockCoordinator {
    fn acquire<'a>(
        &'a self,
        key: &'a LeaseKey,
        holder: &'a LeaseHolder,
        lease: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<bool, LeaseError>> + Send + 'a>> {
        Box::pin(async move {
            let granted = self.try_acquire(key, holder, lease);
            metrics::record_lease_acquire("local", granted);
            Ok(granted)
        })
    }

    fn release<'a>(
        &'a self,
        key: &'a LeaseKey,
        holder: &'a LeaseHolder,
    ) -> Pin<Box<dyn Future<Output = Result<bool, LeaseError>> + Send + 'a>> {
        Box::pin(async move { Ok(self.try_release(key, holder)) })
    }
}

/// Proof that the caller holds a lease.
///
/// Seat mutations take a `&LeaseGuard` so they cannot be called without one. Release
/// it with [`LeaseGuard::release`]; a guard that is dropped instead simply lets the
/// lease run out.
#[derive(Debug)]
pub struct LeaseGuard {
    key: LeaseKey,
    holder: LeaseHolder,
}

impl LeaseGuard {
    /// Leased key
    #[must_use]
    pub const fn key(&self) -> &LeaseKey {
        &self.key
    }

    /// Holder identity
    #[must_use]
    pub const fn holder(&self) -> &LeaseHolder {
        &self.holder
    }

    /// Gives the lease back.
    ///
    /// Backend failures are logged, not returned: the lease expires on its own.
    pub async fn release(self, coordinator: &dyn LockCoordinator) {
        match coordinator.release(&self.key, &self.holder).await {
            Ok(true) => tracing::debug!(key = %self.key, holder = %self.holder, "Lease released"),
            Ok(false) => tracing::warn!(
                key = %self.key,
                holder = %self.holder,
                "Lease had already lapsed before release"
            ),
            Err(e) => tracing::error!(key = %self.key, error = %e, "Failed to release lease"),
        }
    }
}

/// Attempts to take a lease without waiting.
///
/// Returns `Ok(None)` on contention and counts it under `operation`.
///
/// # Errors
///
/// Returns [`LeaseError`] if the backend fails.
pub async fn try_lease(
    coordinator: &dyn LockCoordinator,
    key: LeaseKey,
    holder: LeaseHolder,
    lease: Duration,
    operation: &'static str,
) -> Result<Option<LeaseGuard>, LeaseError> {
    if coordinator.acquire(&key, &holder, lease).await? {
        tracing::debug!(key = %key, holder = %holder, "Lease acquired");
        Ok(Some(LeaseGuard { key, holder }))
    } else {
        tracing::warn!(key = %key, operation, "Lease contended");
        metrics::record_contention(operation);
        Ok(None)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use seatlock_core::environment::SystemClock;
    use seatlock_core::{ConcertId, SeatId, SeatNumber, UserId};

    fn key() -> LeaseKey {
        LeaseKey::seat(SeatId::new(ConcertId::new(1), SeatNumber::new(1)))
    }

    #[tokio::test]
    async fn second_acquire_is_refused_until_release() {
        let coordinator = LocalLockCoordinator::new(Arc::new(SystemClock));
        let alice = LeaseHolder::for_user(&UserId::new("alice"));
        let bob = LeaseHolder::for_user(&UserId::new("bob"));
        let lease = Duration::from_secs(10);

        assert_eq!(coordinator.acquire(&key(), &alice, lease).await, Ok(true));
        assert_eq!(coordinator.acquire(&key(), &bob, lease).await, Ok(false));

        // Only the owner can release
        assert_eq!(coordinator.release(&key(), &bob).await, Ok(false));
        assert_eq!(coordinator.release(&key(), &alice).await, Ok(true));

        assert_eq!(coordinator.acquire(&key(), &bob, lease).await, Ok(true));
    }

    #[tokio::test]
    async fn zero_length_lease_lapses_immediately() {
        let coordinator = LocalLockCoordinator::new(Arc::new(SystemClock));
        let alice = LeaseHolder::for_user(&UserId::new("alice"));
        let bob = LeaseHolder::for_user(&UserId::new("bob"));

        assert_eq!(coordinator.acquire(&key(), &alice, Duration::ZERO).await, Ok(true));
        assert_eq!(
            coordinator.acquire(&key(), &bob, Duration::from_secs(10)).await,
            Ok(true)
        );
        // Alice's stale release must not free Bob's lease
        assert_eq!(coordinator.release(&key(), &alice).await, Ok(false));
        assert_eq!(
            coordinator
                .acquire(&key(), &alice, Duration::from_secs(10))
                .await,
            Ok(false)
        );
    }

    #[tokio::test]
    async fn try_lease_returns_none_on_contention() {
        let coordinator = LocalLockCoordinator::new(Arc::new(SystemClock));
        let lease = Duration::from_secs(10);

        let guard = try_lease(&coordinator, key(), LeaseHolder::background("reaper"), lease, "test")
            .await
            .unwrap()
            .unwrap();
        let second = try_lease(&coordinator, key(), LeaseHolder::background("reaper"), lease, "test").await;
        assert!(matches!(second, Ok(None)));

        guard.release(&coordinator).await;
        let third = try_lease(&coordinator, key(), LeaseHolder::background("reaper"), lease, "test").await;
        assert!(matches!(third, Ok(Some(_))));
    }
}
