//! Failure taxonomy for the reservation engine and its collaborators.
//!
//! [`EngineError`] is what callers of the engine API see. The smaller enums are what
//! collaborators (repositories, lease backends, the balance ledger) and the entity
//! transition functions return; the engine wraps them.

use thiserror::Error;

use crate::reservation::ReservationStatus;
use crate::seat::SeatStatusKind;
use crate::types::{
    AdmissionTokenId, Money, QueueScope, ReservationId, SeatId, UserId,
};

/// A state transition that the entity's current state does not allow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The entity is not in a state that permits this move
    #[error("{entity} cannot move from {from} to {to}")]
    Invalid {
        /// Entity name (`seat`, `reservation`, `token`)
        entity: &'static str,
        /// Current state
        from: &'static str,
        /// Requested state
        to: &'static str,
    },

    /// A held seat was addressed by someone other than its holder
    #[error("seat is held by another user")]
    NotHolder,

    /// The hold or reservation window has elapsed
    #[error("hold window has elapsed")]
    HoldExpired,

    /// Expiry was requested before the deadline passed
    #[error("expiry requested before deadline")]
    NotYetExpired,
}

/// Errors from persistence collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// A uniqueness rule rejected the write
    #[error("conflicting write: {0}")]
    Conflict(String),

    /// Backend failure
    #[error("storage error: {0}")]
    Storage(String),
}

/// Errors from a lease backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaseError {
    /// The backend could not be reached or answered with an error
    #[error("lease backend error: {0}")]
    Backend(String),
}

/// Errors from the balance ledger collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The debit would take the balance below zero
    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance {
        /// Current balance
        balance: Money,
        /// Amount requested
        required: Money,
    },

    /// The credit would overflow the balance
    #[error("balance overflow")]
    Overflow,

    /// Backend failure
    #[error("ledger storage error: {0}")]
    Storage(String),
}

/// Errors returned by the engine API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The caller has no valid ACTIVE admission token
    #[error("a valid active admission token is required")]
    AdmissionRequired,

    /// The seat is not available. `status` is the observed seat status, or `None` when
    /// another bidder currently holds the seat's lease.
    #[error("seat {seat_id} is not available (observed: {})", observed(*.status))]
    SeatNotAvailable {
        /// Seat that was requested
        seat_id: SeatId,
        /// Observed status
        status: Option<SeatStatusKind>,
    },

    /// Another request holds the lease for the resource
    #[error("resource {resource} is busy, retry after {retry_after_seconds}s")]
    ConcurrentReservation {
        /// Lease key that was contended
        resource: String,
        /// Suggested client back-off
        retry_after_seconds: u64,
    },

    /// The reservation's hold window has elapsed
    #[error("reservation {reservation_id} has expired")]
    ReservationExpired {
        /// Reservation id
        reservation_id: ReservationId,
    },

    /// The balance collaborator refused the debit
    #[error("insufficient balance: have {balance}, need {required}")]
    InsufficientBalance {
        /// Current balance
        balance: Money,
        /// Amount requested
        required: Money,
    },

    /// The user already has a live token in the scope
    #[error("user {user_id} is already queued in {scope}")]
    AlreadyQueued {
        /// User id
        user_id: UserId,
        /// Queue scope
        scope: QueueScope,
    },

    /// Seat not found
    #[error("seat not found: {0}")]
    SeatNotFound(SeatId),

    /// Reservation not found
    #[error("reservation not found: {0}")]
    ReservationNotFound(ReservationId),

    /// Admission token not found
    #[error("admission token not found: {0}")]
    TokenNotFound(AdmissionTokenId),

    /// The caller does not own the reservation
    #[error("reservation {0} belongs to another user")]
    NotReservationOwner(ReservationId),

    /// The reservation is no longer pending
    #[error("reservation {reservation_id} is {status}")]
    ReservationNotPending {
        /// Reservation id
        reservation_id: ReservationId,
        /// Current status
        status: ReservationStatus,
    },

    /// An entity refused a transition
    #[error("invalid transition: {0}")]
    InvalidTransition(#[from] TransitionError),

    /// Invalid input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Persistence failure
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// Lease backend failure
    #[error(transparent)]
    Lease(#[from] LeaseError),

    /// Balance ledger failure other than an insufficient balance
    #[error("ledger error: {0}")]
    Ledger(String),
}

fn observed(status: Option<SeatStatusKind>) -> &'static str {
    status.map_or("LOCKED", SeatStatusKind::as_str)
}

impl From<LedgerError> for EngineError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::InsufficientBalance { balance, required } => {
                Self::InsufficientBalance { balance, required }
            }
            other => Self::Ledger(other.to_string()),
        }
    }
}

impl EngineError {
    /// Stable identifier of the failure kind, suitable for wire protocols and metrics.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::AdmissionRequired => "ADMISSION_REQUIRED",
            Self::SeatNotAvailable { .. } => "SEAT_NOT_AVAILABLE",
            Self::ConcurrentReservation { .. } => "CONCURRENT_RESERVATION",
            Self::ReservationExpired { .. } => "RESERVATION_EXPIRED",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::AlreadyQueued { .. } => "ALREADY_QUEUED",
            Self::SeatNotFound(_) => "SEAT_NOT_FOUND",
            Self::ReservationNotFound(_) => "RESERVATION_NOT_FOUND",
            Self::TokenNotFound(_) => "TOKEN_NOT_FOUND",
            Self::NotReservationOwner(_) => "NOT_RESERVATION_OWNER",
            Self::ReservationNotPending { .. } => "RESERVATION_NOT_PENDING",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Repository(_) => "REPOSITORY_ERROR",
            Self::Lease(_) => "LEASE_ERROR",
            Self::Ledger(_) => "LEDGER_ERROR",
        }
    }

    /// Whether a client may reasonably retry the same call later.
    ///
    /// The engine itself never retries.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrentReservation { .. } | Self::Lease(_) | Self::Repository(RepositoryError::Storage(_))
        )
    }

    /// Retry hint in seconds, when the failure carries one
    #[must_use]
    pub const fn retry_after_seconds(&self) -> Option<u64> {
        match self {
            Self::ConcurrentReservation {
                retry_after_seconds,
                ..
            } => Some(*retry_after_seconds),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConcertId, SeatNumber};

    #[test]
    fn insufficient_balance_maps_to_engine_kind() {
        let err: EngineError = LedgerError::InsufficientBalance {
            balance: Money::from_cents(100),
            required: Money::from_cents(500),
        }
        .into();
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        assert!(!err.is_retryable());

        let err: EngineError = LedgerError::Storage("down".into()).into();
        assert_eq!(err.code(), "LEDGER_ERROR");
    }

    #[test]
    fn seat_not_available_reports_observed_status() {
        let seat_id = SeatId::new(ConcertId::new(1), SeatNumber::new(4));
        let err = EngineError::SeatNotAvailable {
            seat_id,
            status: Some(SeatStatusKind::Reserved),
        };
        assert_eq!(err.to_string(), "seat 1:4 is not available (observed: RESERVED)");

        let err = EngineError::SeatNotAvailable {
            seat_id,
            status: None,
        };
        assert!(err.to_string().contains("LOCKED"));
    }

    #[test]
    fn contention_carries_retry_hint() {
        let err = EngineError::ConcurrentReservation {
            resource: "seat_lock:1:4".into(),
            retry_after_seconds: 2,
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after_seconds(), Some(2));
        assert_eq!(EngineError::AdmissionRequired.retry_after_seconds(), None);
    }
}
