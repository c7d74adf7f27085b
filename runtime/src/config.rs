//! Engine configuration.

use std::time::Duration;

/// Tunables shared by all engine components.
///
/// # Example
///
/// ```
/// use seatlock_runtime::config::EngineConfig;
/// use std::time::Duration;
///
/// let config = EngineConfig::default()
///     .with_hold_window(Duration::from_secs(120))
///     .with_scope_capacity(10);
///
/// assert_eq!(config.scope_capacity, 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a seat hold (and its pending reservation) lasts
    pub hold_window: Duration,
    /// Lease duration for seat and payment leases
    pub lease_duration: Duration,
    /// Retry hint attached to `ConcurrentReservation` failures
    pub contention_retry_after: Duration,
    /// Admissions per minute used for wait estimates
    pub throughput_per_minute: u64,
    /// How long an activated token stays valid
    pub active_window: Duration,
    /// How long an unpromoted token stays in line before it is abandoned
    pub waiting_ttl: Duration,
    /// Maximum records handled per sweep and kind
    pub sweep_batch_size: usize,
    /// Interval between promotion passes
    pub promote_interval: Duration,
    /// Interval between reaper sweeps
    pub sweep_interval: Duration,
    /// Concurrently active tokens allowed per scope
    pub scope_capacity: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hold_window: Duration::from_secs(5 * 60),
            lease_duration: Duration::from_secs(10),
            contention_retry_after: Duration::from_secs(1),
            throughput_per_minute: 6,
            active_window: Duration::from_secs(30 * 60),
            waiting_ttl: Duration::from_secs(30 * 60),
            sweep_batch_size: 500,
            promote_interval: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(30),
            scope_capacity: 100,
        }
    }
}

impl EngineConfig {
    /// Set the hold window
    #[must_use]
    pub const fn with_hold_window(mut self, window: Duration) -> Self {
        self.hold_window = window;
        self
    }

    /// Set the lease duration
    #[must_use]
    pub const fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self
    }

    /// Set the contention retry hint
    #[must_use]
    pub const fn with_contention_retry_after(mut self, retry_after: Duration) -> Self {
        self.contention_retry_after = retry_after;
        self
    }

    /// Set admissions per minute (at least 1)
    #[must_use]
    pub const fn with_throughput_per_minute(mut self, throughput: u64) -> Self {
        self.throughput_per_minute = if throughput == 0 { 1 } else { throughput };
        self
    }

    /// Set the active token window
    #[must_use]
    pub const fn with_active_window(mut self, window: Duration) -> Self {
        self.active_window = window;
        self
    }

    /// Set the waiting token TTL
    #[must_use]
    pub const fn with_waiting_ttl(mut self, ttl: Duration) -> Self {
        self.waiting_ttl = ttl;
        self
    }

    /// Set the sweep batch size
    #[must_use]
    pub const fn with_sweep_batch_size(mut self, batch: usize) -> Self {
        self.sweep_batch_size = batch;
        self
    }

    /// Set the promotion interval
    #[must_use]
    pub const fn with_promote_interval(mut self, interval: Duration) -> Self {
        self.promote_interval = interval;
        self
    }

    /// Set the sweep interval
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the per-scope active capacity
    #[must_use]
    pub const fn with_scope_capacity(mut self, capacity: u64) -> Self {
        self.scope_capacity = capacity;
        self
    }

    /// Retry hint in whole seconds, at least 1
    #[must_use]
    pub const fn retry_after_seconds(&self) -> u64 {
        let secs = self.contention_retry_after.as_secs();
        if secs == 0 { 1 } else { secs }
    }

    /// Estimated wait for a token at `place_in_line`, in seconds.
    ///
    /// One minute per full or partial batch of `throughput_per_minute` tokens ahead.
    #[must_use]
    pub const fn estimated_wait_secs(&self, place_in_line: u64) -> u64 {
        let throughput = if self.throughput_per_minute == 0 {
            1
        } else {
            self.throughput_per_minute
        };
        place_in_line.div_ceil(throughput).saturating_mul(60)
    }
}

/// Converts a std duration to a chrono duration, saturating on overflow.
pub(crate) fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}
