//! # Seatlock Testing
//!
//! Testing utilities for the Seatlock reservation engine.
//!
//! This crate provides:
//! - Deterministic clocks (`FixedClock`, `ManualClock`)
//! - In-memory implementations of every collaborator trait
//! - A `RecordingNotifier` that captures notifications for assertions
//! - `TestHarness`, an engine wired to all of the above
//! - proptest strategies for domain values
//!
//! ## Example
//!
//! ```ignore
//! use seatlock_testing::TestHarness;
//!
//! #[tokio::test]
//! async fn hold_a_seat() {
//!     let harness = TestHarness::new();
//!     let seats = harness.concert(1, 10, Money::from_cents(5_000)).await.unwrap();
//!     let token = harness.admit("alice", ConcertId::new(1)).await.unwrap();
//!
//!     let reservation = harness
//!         .engine
//!         .reservations
//!         .hold(&token.id, &UserId::new("alice"), seats[0].id())
//!         .await
//!         .unwrap();
//!     assert_eq!(reservation.status, ReservationStatus::Pending);
//! }
//! ```

use chrono::{DateTime, Utc};
use seatlock_core::environment::Clock;

/// In-memory balance ledger
pub mod balance;

/// Engine wired to in-memory collaborators
pub mod harness;

/// In-memory repositories
pub mod stores;

/// Mock implementations of Environment traits
pub mod mocks {
    #![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
    #![allow(clippy::missing_panics_doc)]

    use super::{Clock, DateTime, Utc};
    use seatlock_core::{Notification, Notifier};
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use seatlock_testing::mocks::FixedClock;
    /// use seatlock_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Clock that only moves when told to.
    ///
    /// Hold windows, token windows and leases all expire against it, so a test can
    /// jump past a deadline instantly.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Starts at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Starts at the same instant as [`test_clock`]
        #[must_use]
        pub fn starting_at_test_epoch() -> Self {
            Self::new(test_clock().now())
        }

        /// Moves the clock forward
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.write().unwrap();
            *time += by;
        }

        /// Sets the clock
        pub fn set(&self, to: DateTime<Utc>) {
            *self.time.write().unwrap() = to;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.read().unwrap()
        }
    }

    /// Notifier that keeps every notification for later assertions.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingNotifier {
        sent: Arc<RwLock<Vec<Notification>>>,
    }

    impl RecordingNotifier {
        /// Creates an empty recorder
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything notified so far, in order
        #[must_use]
        pub fn notifications(&self) -> Vec<Notification> {
            self.sent.read().unwrap().clone()
        }

        /// Notifications of one kind (see [`Notification::kind`])
        #[must_use]
        pub fn of_kind(&self, kind: &str) -> Vec<Notification> {
            self.sent
                .read()
                .unwrap()
                .iter()
                .filter(|n| n.kind() == kind)
                .cloned()
                .collect()
        }

        /// Forget everything recorded
        pub fn clear(&self) {
            self.sent.write().unwrap().clear();
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: Notification) {
            self.sent.write().unwrap().push(notification);
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use seatlock_core::{ConcertId, Money, SeatId, SeatNumber, UserId};

    /// A user id from a small pool, so generated scenarios collide on users
    pub fn user_id() -> impl Strategy<Value = UserId> {
        (0u8..8).prop_map(|n| UserId::new(format!("user-{n}")))
    }

    /// A seat id among the first `seats` seats of concert 1
    pub fn seat_id(seats: u32) -> impl Strategy<Value = SeatId> {
        (1..=seats.max(1)).prop_map(|n| SeatId::new(ConcertId::new(1), SeatNumber::new(n)))
    }

    /// A ticket price between $1.00 and $500.00
    pub fn price() -> impl Strategy<Value = Money> {
        (100u64..=50_000).prop_map(Money::from_cents)
    }
}

/// Installs a `tracing` subscriber that writes through the test harness's captured
/// output. Safe to call from every test; only the first call installs.
pub fn init_test_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use balance::InMemoryBalanceLedger;
pub use harness::TestHarness;
pub use mocks::{FixedClock, ManualClock, RecordingNotifier, test_clock};
pub use stores::{
    InMemoryAdmissionTokenRepository, InMemoryReservationRepository, InMemorySeatRepository,
};
