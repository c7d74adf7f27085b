//! `Redis` lease coordinator for the Seatlock engine.
//!
//! A lease is a plain key holding the holder's token, written with `SET NX PX` so that
//! Redis itself expires it. Release runs a compare-and-delete script so a holder can
//! never remove a lease that lapsed and was granted to someone else.
//!
//! # Example
//!
//! ```no_run
//! use seatlock_redis::RedisLockCoordinator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let locks = RedisLockCoordinator::new("redis://127.0.0.1:6379").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use redis::aio::ConnectionManager;
use redis::{Client, Script};
use seatlock_core::{LEASE_ACQUIRE_METRIC, LeaseError, LeaseHolder, LeaseKey, LockCoordinator};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Deletes `KEYS[1]` only while it still holds `ARGV[1]`.
const RELEASE_SCRIPT: &str = r"
    if redis.call('GET', KEYS[1]) == ARGV[1] then
        return redis.call('DEL', KEYS[1])
    end
    return 0
";

/// `Redis` lease coordinator.
#[derive(Clone)]
pub struct RedisLockCoordinator {
    conn_manager: ConnectionManager,
    release: Script,
}

impl RedisLockCoordinator {
    /// Connects to `redis_url`.
    ///
    /// # Errors
    ///
    /// [`LeaseError::Backend`] if the client cannot be created or the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self, LeaseError> {
        let client = Client::open(redis_url)
            .map_err(|e| LeaseError::Backend(format!("Failed to create Redis client: {e}")))?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            LeaseError::Backend(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self::from_manager(conn_manager))
    }

    /// Wraps an existing connection manager.
    #[must_use]
    pub fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            release: Script::new(RELEASE_SCRIPT),
        }
    }
}

/// Lease length in whole milliseconds, at least 1 since `PX 0` is rejected.
fn lease_millis(lease: Duration) -> u64 {
    u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1)
}

impl LockCoordinator for RedisLockCoordinator {
    fn acquire<'a>(
        &'a self,
        key: &'a LeaseKey,
        holder: &'a LeaseHolder,
        lease: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<bool, LeaseError>> + Send + 'a>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let reply: Option<String> = redis::cmd("SET")
                .arg(key.as_str())
                .arg(holder.as_str())
                .arg("NX")
                .arg("PX")
                .arg(lease_millis(lease))
                .query_async(&mut conn)
                .await
                .map_err(|e| LeaseError::Backend(format!("Failed to acquire {key}: {e}")))?;

            let granted = reply.is_some();
            metrics::counter!(
                LEASE_ACQUIRE_METRIC,
                "backend" => "redis",
                "granted" => if granted { "true" } else { "false" }
            )
            .increment(1);
            tracing::trace!(key = %key, holder = %holder, granted, "Lease acquire");
            Ok(granted)
        })
    }

    fn release<'a>(
        &'a self,
        key: &'a LeaseKey,
        holder: &'a LeaseHolder,
    ) -> Pin<Box<dyn Future<Output = Result<bool, LeaseError>> + Send + 'a>> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();

            let deleted: i64 = self
                .release
                .key(key.as_str())
                .arg(holder.as_str())
                .invoke_async(&mut conn)
                .await
                .map_err(|e| LeaseError::Backend(format!("Failed to release {key}: {e}")))?;

            if deleted == 0 {
                tracing::debug!(key = %key, holder = %holder, "Lease not held; nothing released");
            }
            Ok(deleted == 1)
        })
    }
}
