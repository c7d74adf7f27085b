//! Persistence collaborators.
//!
//! Storage is keyed by identity and only needs read-committed semantics per record:
//! the engine serializes writes to seats and reservations through seat leases, and
//! admission tokens are written by one operation at a time.
//!
//! # Implementations
//!
//! - In-memory repositories (in `seatlock-testing`)
//! - `PostgreSQL` repositories (in `seatlock-postgres`)

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

use crate::admission::AdmissionToken;
use crate::error::RepositoryError;
use crate::reservation::Reservation;
use crate::seat::Seat;
use crate::types::{AdmissionTokenId, ConcertId, QueueScope, ReservationId, SeatId};

/// Boxed future returned by repository methods.
pub type RepoFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'a>>;

/// Keyset position in the expired-reservation listing: the `(expires_at, id)` of the
/// last record seen.
pub type ExpiryCursor = (DateTime<Utc>, ReservationId);

/// Seat storage.
pub trait SeatRepository: Send + Sync {
    /// Inserts new seats.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Conflict`] if any seat already exists; nothing is inserted then.
    fn insert_many(&self, seats: Vec<Seat>) -> RepoFuture<'_, ()>;

    /// Loads a seat.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on backend failure.
    fn find(&self, seat_id: SeatId) -> RepoFuture<'_, Option<Seat>>;

    /// Overwrites an existing seat.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if the seat does not exist.
    fn save(&self, seat: Seat) -> RepoFuture<'_, ()>;

    /// All seats of a concert, ordered by seat number.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on backend failure.
    fn list_by_concert(&self, concert_id: ConcertId) -> RepoFuture<'_, Vec<Seat>>;
}

/// Reservation storage.
pub trait ReservationRepository: Send + Sync {
    /// Inserts a new reservation.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Conflict`] if the id exists or the seat already has a pending
    /// reservation.
    fn insert(&self, reservation: Reservation) -> RepoFuture<'_, ()>;

    /// Loads a reservation.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on backend failure.
    fn find(&self, id: ReservationId) -> RepoFuture<'_, Option<Reservation>>;

    /// Overwrites an existing reservation.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if the reservation does not exist.
    fn save(&self, reservation: Reservation) -> RepoFuture<'_, ()>;

    /// The pending reservation of a seat, if any.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on backend failure.
    fn find_pending_for_seat(&self, seat_id: SeatId) -> RepoFuture<'_, Option<Reservation>>;

    /// Up to `limit` pending reservations whose window elapsed at `now`, ordered by
    /// `(expires_at, id)`.
    ///
    /// With `after` set, only reservations strictly past that cursor are returned, so a
    /// caller can page beyond records it failed to process.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on backend failure.
    fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
        after: Option<ExpiryCursor>,
        limit: usize,
    ) -> RepoFuture<'_, Vec<Reservation>>;
}

/// Admission token storage.
pub trait AdmissionTokenRepository: Send + Sync {
    /// Allocates the next position for `scope`. Positions start at 1, are strictly
    /// increasing and never reused.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on backend failure.
    fn next_position<'a>(&'a self, scope: &'a QueueScope) -> RepoFuture<'a, u64>;

    /// Inserts a token unless its user already has a live token in the same scope at `now`.
    ///
    /// The check and the insert are atomic.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Conflict`] if a live token exists.
    fn insert_unique(&self, token: AdmissionToken, now: DateTime<Utc>) -> RepoFuture<'_, ()>;

    /// Loads a token.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on backend failure.
    fn find<'a>(&'a self, id: &'a AdmissionTokenId) -> RepoFuture<'a, Option<AdmissionToken>>;

    /// Overwrites an existing token.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::NotFound`] if the token does not exist.
    fn save(&self, token: AdmissionToken) -> RepoFuture<'_, ()>;

    /// Up to `limit` WAITING tokens of a scope that are still live at `now`, in
    /// position order. Lapsed tokens are left for the reaper.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on backend failure.
    fn list_waiting<'a>(
        &'a self,
        scope: &'a QueueScope,
        now: DateTime<Utc>,
        limit: usize,
    ) -> RepoFuture<'a, Vec<AdmissionToken>>;

    /// Number of WAITING tokens in a scope with a position lower than `position`.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on backend failure.
    fn count_waiting_before<'a>(&'a self, scope: &'a QueueScope, position: u64) -> RepoFuture<'a, u64>;

    /// Number of ACTIVE tokens in a scope that are unexpired at `now`.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on backend failure.
    fn count_active<'a>(&'a self, scope: &'a QueueScope, now: DateTime<Utc>) -> RepoFuture<'a, u64>;

    /// Up to `limit` WAITING or ACTIVE tokens whose deadline passed at `now`.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on backend failure.
    fn list_lapsed(&self, now: DateTime<Utc>, limit: usize) -> RepoFuture<'_, Vec<AdmissionToken>>;

    /// Scopes that currently have WAITING tokens.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] on backend failure.
    fn scopes(&self) -> RepoFuture<'_, Vec<QueueScope>>;
}
