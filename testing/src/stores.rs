//! In-memory repositories.
//!
//! `HashMap`/`BTreeMap` storage behind `RwLock`, with the same conflict rules as the
//! Postgres adapters. Each repository can be told to fail writes for chosen records so
//! tests can exercise compensation and skip-and-continue paths.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use seatlock_core::{
    AdmissionToken, AdmissionTokenId, AdmissionTokenRepository, ConcertId, ExpiryCursor,
    QueueScope, RepoFuture, RepositoryError, Reservation, ReservationId, ReservationRepository,
    ReservationStatus, Seat, SeatId, SeatRepository, TokenStatus,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// In-memory seat storage, ordered by seat id.
#[derive(Clone, Debug, Default)]
pub struct InMemorySeatRepository {
    seats: Arc<RwLock<BTreeMap<SeatId, Seat>>>,
}

impl InMemorySeatRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a seat, for assertions
    #[must_use]
    pub fn get(&self, seat_id: SeatId) -> Option<Seat> {
        self.seats.read().unwrap().get(&seat_id).cloned()
    }

    /// Number of stored seats
    #[must_use]
    pub fn len(&self) -> usize {
        self.seats.read().unwrap().len()
    }

    /// Whether no seat is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seats.read().unwrap().is_empty()
    }
}

impl SeatRepository for InMemorySeatRepository {
    fn insert_many(&self, seats: Vec<Seat>) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let mut stored = self.seats.write().unwrap();
            if let Some(existing) = seats.iter().find(|seat| stored.contains_key(&seat.id())) {
                return Err(RepositoryError::Conflict(format!(
                    "seat {} already exists",
                    existing.id()
                )));
            }
            for seat in seats {
                stored.insert(seat.id(), seat);
            }
            Ok(())
        })
    }

    fn find(&self, seat_id: SeatId) -> RepoFuture<'_, Option<Seat>> {
        Box::pin(async move { Ok(self.get(seat_id)) })
    }

    fn save(&self, seat: Seat) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let mut stored = self.seats.write().unwrap();
            match stored.get_mut(&seat.id()) {
                Some(slot) => {
                    *slot = seat;
                    Ok(())
                }
                None => Err(RepositoryError::NotFound(format!("seat {}", seat.id()))),
            }
        })
    }

    fn list_by_concert(&self, concert_id: ConcertId) -> RepoFuture<'_, Vec<Seat>> {
        Box::pin(async move {
            Ok(self
                .seats
                .read()
                .unwrap()
                .values()
                .filter(|seat| seat.id().concert_id == concert_id)
                .cloned()
                .collect())
        })
    }
}

/// In-memory reservation storage.
///
/// Enforces at most one PENDING reservation per seat on insert.
#[derive(Clone, Debug, Default)]
pub struct InMemoryReservationRepository {
    reservations: Arc<RwLock<HashMap<ReservationId, Reservation>>>,
    failing: Arc<RwLock<HashSet<ReservationId>>>,
    fail_inserts: Arc<RwLock<bool>>,
}

impl InMemoryReservationRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a reservation, for assertions
    #[must_use]
    pub fn get(&self, id: ReservationId) -> Option<Reservation> {
        self.reservations.read().unwrap().get(&id).cloned()
    }

    /// All reservations of a seat
    #[must_use]
    pub fn for_seat(&self, seat_id: SeatId) -> Vec<Reservation> {
        self.reservations
            .read()
            .unwrap()
            .values()
            .filter(|r| r.seat_id == seat_id)
            .cloned()
            .collect()
    }

    /// Make every `save` of this reservation fail with a storage error
    pub fn fail_saves_for(&self, id: ReservationId) {
        self.failing.write().unwrap().insert(id);
    }

    /// Make every `insert` fail with a storage error
    pub fn fail_inserts(&self, fail: bool) {
        *self.fail_inserts.write().unwrap() = fail;
    }
}

impl ReservationRepository for InMemoryReservationRepository {
    fn insert(&self, reservation: Reservation) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            if *self.fail_inserts.read().unwrap() {
                return Err(RepositoryError::Storage("injected insert failure".into()));
            }
            let mut stored = self.reservations.write().unwrap();
            if stored.contains_key(&reservation.id) {
                return Err(RepositoryError::Conflict(format!(
                    "reservation {} already exists",
                    reservation.id
                )));
            }
            if reservation.status == ReservationStatus::Pending
                && stored
                    .values()
                    .any(|r| r.seat_id == reservation.seat_id && r.status == ReservationStatus::Pending)
            {
                return Err(RepositoryError::Conflict(format!(
                    "seat {} already has a pending reservation",
                    reservation.seat_id
                )));
            }
            stored.insert(reservation.id, reservation);
            Ok(())
        })
    }

    fn find(&self, id: ReservationId) -> RepoFuture<'_, Option<Reservation>> {
        Box::pin(async move { Ok(self.get(id)) })
    }

    fn save(&self, reservation: Reservation) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            if self.failing.read().unwrap().contains(&reservation.id) {
                return Err(RepositoryError::Storage(format!(
                    "injected save failure for {}",
                    reservation.id
                )));
            }
            let mut stored = self.reservations.write().unwrap();
            match stored.get_mut(&reservation.id) {
                Some(slot) => {
                    *slot = reservation;
                    Ok(())
                }
                None => Err(RepositoryError::NotFound(format!("reservation {}", reservation.id))),
            }
        })
    }

    fn find_pending_for_seat(&self, seat_id: SeatId) -> RepoFuture<'_, Option<Reservation>> {
        Box::pin(async move {
            Ok(self
                .reservations
                .read()
                .unwrap()
                .values()
                .find(|r| r.seat_id == seat_id && r.status == ReservationStatus::Pending)
                .cloned())
        })
    }

    fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
        after: Option<ExpiryCursor>,
        limit: usize,
    ) -> RepoFuture<'_, Vec<Reservation>> {
        Box::pin(async move {
            let mut expired: Vec<Reservation> = self
                .reservations
                .read()
                .unwrap()
                .values()
                .filter(|r| r.status == ReservationStatus::Pending && r.is_expired(now))
                .filter(|r| after.is_none_or(|cursor| (r.expires_at, r.id) > cursor))
                .cloned()
                .collect();
            expired.sort_by_key(|r| (r.expires_at, r.id));
            expired.truncate(limit);
            Ok(expired)
        })
    }
}

#[derive(Debug, Default)]
struct TokenState {
    tokens: HashMap<AdmissionTokenId, AdmissionToken>,
    sequences: HashMap<QueueScope, u64>,
}

/// In-memory admission token storage.
#[derive(Clone, Debug, Default)]
pub struct InMemoryAdmissionTokenRepository {
    state: Arc<RwLock<TokenState>>,
}

impl InMemoryAdmissionTokenRepository {
    /// Create an empty repository
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a token, for assertions
    #[must_use]
    pub fn get(&self, id: &AdmissionTokenId) -> Option<AdmissionToken> {
        self.state.read().unwrap().tokens.get(id).cloned()
    }

    /// All tokens of a scope, in position order
    #[must_use]
    pub fn in_scope(&self, scope: &QueueScope) -> Vec<AdmissionToken> {
        let mut tokens: Vec<AdmissionToken> = self
            .state
            .read()
            .unwrap()
            .tokens
            .values()
            .filter(|t| &t.scope == scope)
            .cloned()
            .collect();
        tokens.sort_by_key(|t| t.position);
        tokens
    }
}

impl AdmissionTokenRepository for InMemoryAdmissionTokenRepository {
    fn next_position<'a>(&'a self, scope: &'a QueueScope) -> RepoFuture<'a, u64> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let next = state.sequences.entry(scope.clone()).or_insert(0);
            *next += 1;
            Ok(*next)
        })
    }

    fn insert_unique(&self, token: AdmissionToken, now: DateTime<Utc>) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            let duplicate = state.tokens.values().any(|t| {
                t.user_id == token.user_id && t.scope == token.scope && t.is_live(now)
            });
            if duplicate {
                return Err(RepositoryError::Conflict(format!(
                    "user {} already queued in {}",
                    token.user_id, token.scope
                )));
            }
            state.tokens.insert(token.id.clone(), token);
            Ok(())
        })
    }

    fn find<'a>(&'a self, id: &'a AdmissionTokenId) -> RepoFuture<'a, Option<AdmissionToken>> {
        Box::pin(async move { Ok(self.get(id)) })
    }

    fn save(&self, token: AdmissionToken) -> RepoFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.write().unwrap();
            match state.tokens.get_mut(&token.id) {
                Some(slot) => {
                    *slot = token;
                    Ok(())
                }
                None => Err(RepositoryError::NotFound(format!("token {}", token.id))),
            }
        })
    }

    fn list_waiting<'a>(
        &'a self,
        scope: &'a QueueScope,
        now: DateTime<Utc>,
        limit: usize,
    ) -> RepoFuture<'a, Vec<AdmissionToken>> {
        Box::pin(async move {
            let mut waiting: Vec<AdmissionToken> = self
                .in_scope(scope)
                .into_iter()
                .filter(|t| t.status == TokenStatus::Waiting && now < t.expires_at)
                .collect();
            waiting.truncate(limit);
            Ok(waiting)
        })
    }

    fn count_waiting_before<'a>(&'a self, scope: &'a QueueScope, position: u64) -> RepoFuture<'a, u64> {
        Box::pin(async move {
            let count = self
                .state
                .read()
                .unwrap()
                .tokens
                .values()
                .filter(|t| &t.scope == scope && t.status == TokenStatus::Waiting && t.position < position)
                .count();
            Ok(count as u64)
        })
    }

    fn count_active<'a>(&'a self, scope: &'a QueueScope, now: DateTime<Utc>) -> RepoFuture<'a, u64> {
        Box::pin(async move {
            let count = self
                .state
                .read()
                .unwrap()
                .tokens
                .values()
                .filter(|t| &t.scope == scope && t.is_valid(now))
                .count();
            Ok(count as u64)
        })
    }

    fn list_lapsed(&self, now: DateTime<Utc>, limit: usize) -> RepoFuture<'_, Vec<AdmissionToken>> {
        Box::pin(async move {
            let mut lapsed: Vec<AdmissionToken> = self
                .state
                .read()
                .unwrap()
                .tokens
                .values()
                .filter(|t| t.status != TokenStatus::Expired && now >= t.expires_at)
                .cloned()
                .collect();
            lapsed.sort_by_key(|t| t.expires_at);
            lapsed.truncate(limit);
            Ok(lapsed)
        })
    }

    fn scopes(&self) -> RepoFuture<'_, Vec<QueueScope>> {
        Box::pin(async move {
            let scopes: BTreeSet<QueueScope> = self
                .state
                .read()
                .unwrap()
                .tokens
                .values()
                .filter(|t| t.status == TokenStatus::Waiting)
                .map(|t| t.scope.clone())
                .collect();
            Ok(scopes.into_iter().collect())
        })
    }
}
