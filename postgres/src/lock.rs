//! Leases stored as rows.
//!
//! A lease row may be overwritten only once its `expires_at` has passed, judged by
//! the database clock so that every engine instance agrees on expiry.

use seatlock_core::{LEASE_ACQUIRE_METRIC, LeaseError, LeaseHolder, LeaseKey, LockCoordinator};
use sqlx::PgPool;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// `PostgreSQL` lease coordinator.
#[derive(Clone)]
pub struct PostgresLockCoordinator {
    pool: PgPool,
}

impl PostgresLockCoordinator {
    /// Creates a coordinator over `pool`
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Deletes lapsed lease rows. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// [`LeaseError::Backend`] on database failure.
    pub async fn purge_expired(&self) -> Result<u64, LeaseError> {
        let result = sqlx::query("DELETE FROM leases WHERE expires_at <= now()")
            .execute(&self.pool)
            .await
            .map_err(|e| LeaseError::Backend(format!("purge leases: {e}")))?;
        Ok(result.rows_affected())
    }
}

impl LockCoordinator for PostgresLockCoordinator {
    fn acquire<'a>(
        &'a self,
        key: &'a LeaseKey,
        holder: &'a LeaseHolder,
        lease: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<bool, LeaseError>> + Send + 'a>> {
        Box::pin(async move {
            let granted = sqlx::query(
                r"
                INSERT INTO leases (key, holder, expires_at)
                VALUES ($1, $2, now() + make_interval(secs => $3))
                ON CONFLICT (key) DO UPDATE
                SET holder = EXCLUDED.holder, expires_at = EXCLUDED.expires_at
                WHERE leases.expires_at <= now()
                RETURNING key
                ",
            )
            .bind(key.as_str())
            .bind(holder.as_str())
            .bind(lease.as_secs_f64())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LeaseError::Backend(format!("acquire {key}: {e}")))?
            .is_some();

            metrics::counter!(
                LEASE_ACQUIRE_METRIC,
                "backend" => "postgres",
                "granted" => if granted { "true" } else { "false" }
            )
            .increment(1);
            Ok(granted)
        })
    }

    fn release<'a>(
        &'a self,
        key: &'a LeaseKey,
        holder: &'a LeaseHolder,
    ) -> Pin<Box<dyn Future<Output = Result<bool, LeaseError>> + Send + 'a>> {
        Box::pin(async move {
            let row: Option<(bool,)> = sqlx::query_as(
                "DELETE FROM leases WHERE key = $1 AND holder = $2 RETURNING expires_at > now()",
            )
            .bind(key.as_str())
            .bind(holder.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LeaseError::Backend(format!("release {key}: {e}")))?;

            Ok(row.is_some_and(|(live,)| live))
        })
    }
}
