//! Client-side retry for lease contention.
//!
//! The engine never retries on its own. Callers that want to ride out a short burst of
//! contention on confirm, cancel or pay wrap the call in [`retry_on_contention`], which
//! retries only [`EngineError::ConcurrentReservation`] and waits at least as long as the
//! failure's retry hint.
//!
//! # Example
//!
//! ```rust,ignore
//! use seatlock_runtime::retry::{RetryPolicy, retry_on_contention};
//!
//! let receipt = retry_on_contention(RetryPolicy::default(), || {
//!     payments.pay(reservation_id, &user_id)
//! })
//! .await?;
//! ```

use seatlock_core::EngineError;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 250ms
/// - `max_delay`: 5 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Calculate delay for a given attempt number.
    ///
    /// Uses exponential backoff: delay = `initial_delay` * (multiplier ^ attempt),
    /// capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Retries `operation` while it fails with [`EngineError::ConcurrentReservation`].
///
/// The wait before each retry is the larger of the backoff delay and the failure's
/// `retry_after_seconds` hint. Every other error is returned at once.
///
/// # Errors
///
/// The first non-contention error, or the last contention error once `max_retries`
/// retries are used up.
pub async fn retry_on_contention<F, Fut, T>(policy: RetryPolicy, mut operation: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after contention retry");
                }
                return Ok(result);
            }
            Err(err) => {
                let Some(hint) = err.retry_after_seconds() else {
                    return Err(err);
                };
                if attempt >= policy.max_retries {
                    tracing::warn!(attempt, error = %err, "Contention persisted after max retries");
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt).max(Duration::from_secs(hint));
                tracing::debug!(
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Contended, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
