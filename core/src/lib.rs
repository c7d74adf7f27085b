//! # Seatlock Core
//!
//! Domain types and collaborator traits for the Seatlock seat-reservation engine.
//!
//! This crate holds everything that is shared between the engine runtime, the storage
//! adapters, and the test doubles:
//!
//! - **Entities**: [`Seat`](seat::Seat), [`Reservation`](reservation::Reservation) and
//!   [`AdmissionToken`](admission::AdmissionToken), each with validating transition functions
//! - **Errors**: the engine failure taxonomy ([`EngineError`](error::EngineError)) and the
//!   collaborator errors it wraps
//! - **Collaborators**: traits for leases, persistence, the balance ledger and notifications,
//!   injected into the runtime as `Arc<dyn Trait>`
//!
//! ## State Machines
//!
//! ```text
//! Seat:         Available ──hold──▶ Held ──confirm──▶ Reserved
//!                   ▲                 │
//!                   └──release────────┘   (cancel, expiry)
//!
//! Reservation:  Pending ──▶ Confirmed | Cancelled | Expired
//!
//! Token:        Waiting ──promote──▶ Active ──timeout──▶ Expired
//! ```
//!
//! Every transition checks the current state first and returns a
//! [`TransitionError`](error::TransitionError) when the move is not allowed.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod admission;
pub mod balance;
pub mod error;
pub mod lease;
pub mod notification;
pub mod repository;
pub mod reservation;
pub mod seat;
pub mod types;

/// Environment module - Dependency injection traits
///
/// External dependencies that the engine needs but should never construct itself.
/// The storage and lease collaborators live in [`repository`](crate::repository) and
/// [`lease`](crate::lease); this module only carries time.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Every expiry in the engine (holds, admission tokens, leases) is computed against
    /// this clock, so tests can jump past a deadline without sleeping.
    ///
    /// # Examples
    ///
    /// ```
    /// use seatlock_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use admission::{AdmissionToken, TokenStatus};
pub use balance::{
    BalanceLedger, EntryKind, LEDGER_ENTRIES_METRIC, LedgerEntry, LedgerEntryId, LedgerFuture,
};
pub use error::{EngineError, LeaseError, LedgerError, RepositoryError, TransitionError};
pub use lease::{LEASE_ACQUIRE_METRIC, LeaseHolder, LeaseKey, LockCoordinator};
pub use notification::{BroadcastNotifier, Notification, Notifier, TracingNotifier};
pub use repository::{
    AdmissionTokenRepository, ExpiryCursor, RepoFuture, ReservationRepository, SeatRepository,
};
pub use reservation::{Reservation, ReservationStatus};
pub use seat::{Seat, SeatStatus, SeatStatusKind};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
