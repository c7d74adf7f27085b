//! An [`Engine`] wired to in-memory collaborators and a manual clock.

use seatlock_core::{
    AdmissionToken, ConcertId, EngineError, Money, QueueScope, Seat, SeatNumber, UserId,
};
use seatlock_runtime::{Engine, EngineConfig, EngineEnvironment, LocalLockCoordinator};
use std::sync::Arc;

use crate::balance::InMemoryBalanceLedger;
use crate::mocks::{ManualClock, RecordingNotifier};
use crate::stores::{
    InMemoryAdmissionTokenRepository, InMemoryReservationRepository, InMemorySeatRepository,
};

/// Capacity used by [`TestHarness::admit`] so admission never waits on other users.
const ADMIT_CAPACITY: u64 = u64::MAX;

/// Engine plus handles on every collaborator behind it.
///
/// Time only moves through [`TestHarness::clock`], so hold windows, token windows and
/// leases can be run out instantly.
pub struct TestHarness {
    /// The engine under test
    pub engine: Engine,
    /// Shared clock; advance it to let deadlines pass
    pub clock: Arc<ManualClock>,
    /// Seat storage
    pub seats: InMemorySeatRepository,
    /// Reservation storage
    pub reservations: InMemoryReservationRepository,
    /// Token storage
    pub tokens: InMemoryAdmissionTokenRepository,
    /// Balance ledger
    pub balances: InMemoryBalanceLedger,
    /// Lease backend, shared with the engine
    pub locks: Arc<LocalLockCoordinator>,
    /// Every notification the engine emitted
    pub notifier: RecordingNotifier,
}

impl TestHarness {
    /// Harness with the default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Harness with a custom configuration
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        let clock = Arc::new(ManualClock::starting_at_test_epoch());
        let seats = InMemorySeatRepository::new();
        let reservations = InMemoryReservationRepository::new();
        let tokens = InMemoryAdmissionTokenRepository::new();
        let balances = InMemoryBalanceLedger::new(clock.clone());
        let locks = Arc::new(LocalLockCoordinator::new(clock.clone()));
        let notifier = RecordingNotifier::new();

        let env = EngineEnvironment::new(
            Arc::new(seats.clone()),
            Arc::new(reservations.clone()),
            Arc::new(tokens.clone()),
            Arc::new(balances.clone()),
            locks.clone(),
            Arc::new(notifier.clone()),
            clock.clone(),
        );

        Self {
            engine: Engine::new(env, config),
            clock,
            seats,
            reservations,
            tokens,
            balances,
            locks,
            notifier,
        }
    }

    /// Registers `count` seats numbered from 1, all at `price`.
    ///
    /// # Errors
    ///
    /// Whatever [`SeatLedger::register_concert`](seatlock_runtime::SeatLedger::register_concert)
    /// returns.
    pub async fn concert(&self, concert_id: u64, count: u32, price: Money) -> Result<Vec<Seat>, EngineError> {
        let seats = (1..=count).map(|n| (SeatNumber::new(n), price)).collect();
        self.engine
            .ledger
            .register_concert(ConcertId::new(concert_id), seats)
            .await
    }

    /// Queues `user` for `concert_id` and promotes the queue so the returned token is
    /// ACTIVE.
    ///
    /// # Errors
    ///
    /// Enqueue or promotion failures.
    pub async fn admit(&self, user: &str, concert_id: ConcertId) -> Result<AdmissionToken, EngineError> {
        let scope = QueueScope::for_concert(concert_id);
        let token = self
            .engine
            .queue
            .enqueue(UserId::new(user), scope.clone())
            .await?;
        self.engine.queue.promote(&scope, ADMIT_CAPACITY).await?;
        self.engine.queue.status(&token.id).await
    }

    /// Adds `amount` to `user`'s balance.
    ///
    /// # Errors
    ///
    /// Ledger failures.
    pub async fn fund(&self, user: &str, amount: Money) -> Result<Money, EngineError> {
        use seatlock_core::BalanceLedger;

        let entry = self.balances.charge(&UserId::new(user), amount).await?;
        Ok(entry.balance_after)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
