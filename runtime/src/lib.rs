//! # Seatlock Runtime
//!
//! The seat-reservation concurrency engine.
//!
//! ## Components
//!
//! - **`LocalLockCoordinator`**: in-process leases; the other backends live in the
//!   Postgres and Redis crates
//! - **`SeatLedger`**: per-seat state, mutated only under the seat lease
//! - **`AdmissionQueue`**: waiting-room tokens, positions, promotion
//! - **`ReservationEngine`**: hold → confirm / cancel
//! - **`ExpiryReaper`**: reclaims lapsed holds and tokens
//! - **`PaymentCoordinator`**: debit through the balance ledger, then confirm
//! - **`Scheduler`**: drives promotion and sweeps on fixed intervals
//!
//! ## Example
//!
//! ```ignore
//! use seatlock_runtime::{Engine, EngineEnvironment, config::EngineConfig};
//!
//! let engine = Engine::new(environment, EngineConfig::default());
//!
//! let token = engine.queue.enqueue(user.clone(), QueueScope::for_concert(concert)).await?;
//! engine.queue.promote(&token.scope, 100).await?;
//! let reservation = engine.reservations.hold(&token.id, &user, seat_id).await?;
//! let receipt = engine.payments.pay(reservation.id, &user).await?;
//! ```

use seatlock_core::environment::Clock;
use seatlock_core::{
    AdmissionTokenRepository, BalanceLedger, LockCoordinator, Notifier, ReservationRepository,
    SeatRepository,
};
use std::sync::Arc;

/// Engine configuration
pub mod config;

/// Lease coordination
pub mod lock;

/// Seat state keeper
pub mod ledger;

/// Waiting room
pub mod admission;

/// Hold, confirm and cancel
pub mod engine;

/// Expiry reaper
pub mod reaper;

/// Debit-then-confirm orchestration
pub mod payment;

/// Background loops
pub mod scheduler;

/// Client-side contention retry
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

pub use admission::AdmissionQueue;
pub use config::EngineConfig;
pub use engine::{ReservationEngine, ReservationView};
pub use ledger::SeatLedger;
pub use lock::{LeaseGuard, LocalLockCoordinator};
pub use payment::{PaymentCoordinator, PaymentReceipt};
pub use reaper::{ExpiryReaper, SweepReport};
pub use scheduler::Scheduler;

/// Collaborators the engine needs but never constructs.
#[derive(Clone)]
pub struct EngineEnvironment {
    /// Seat storage
    pub seats: Arc<dyn SeatRepository>,
    /// Reservation storage
    pub reservations: Arc<dyn ReservationRepository>,
    /// Admission token storage
    pub tokens: Arc<dyn AdmissionTokenRepository>,
    /// Balance ledger
    pub balances: Arc<dyn BalanceLedger>,
    /// Lease backend
    pub locks: Arc<dyn LockCoordinator>,
    /// Notification sink
    pub notifier: Arc<dyn Notifier>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl EngineEnvironment {
    /// Bundles the collaborators
    #[must_use]
    pub fn new(
        seats: Arc<dyn SeatRepository>,
        reservations: Arc<dyn ReservationRepository>,
        tokens: Arc<dyn AdmissionTokenRepository>,
        balances: Arc<dyn BalanceLedger>,
        locks: Arc<dyn LockCoordinator>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            seats,
            reservations,
            tokens,
            balances,
            locks,
            notifier,
            clock,
        }
    }
}

/// All engine components wired to one environment.
#[derive(Clone)]
pub struct Engine {
    /// Seat ledger
    pub ledger: SeatLedger,
    /// Waiting room
    pub queue: AdmissionQueue,
    /// Reservation engine
    pub reservations: ReservationEngine,
    /// Expiry reaper
    pub reaper: ExpiryReaper,
    /// Payment coordinator
    pub payments: PaymentCoordinator,
    config: EngineConfig,
}

impl Engine {
    /// Wires every component to `env`.
    #[must_use]
    pub fn new(env: EngineEnvironment, config: EngineConfig) -> Self {
        let ledger = SeatLedger::new(Arc::clone(&env.seats));
        let queue = AdmissionQueue::new(
            Arc::clone(&env.tokens),
            Arc::clone(&env.locks),
            Arc::clone(&env.notifier),
            Arc::clone(&env.clock),
            config.clone(),
        );
        let reservations = ReservationEngine::new(
            ledger.clone(),
            Arc::clone(&env.reservations),
            Arc::clone(&env.tokens),
            Arc::clone(&env.locks),
            Arc::clone(&env.notifier),
            Arc::clone(&env.clock),
            config.clone(),
        );
        let reaper = ExpiryReaper::new(
            ledger.clone(),
            Arc::clone(&env.reservations),
            Arc::clone(&env.tokens),
            Arc::clone(&env.locks),
            Arc::clone(&env.notifier),
            Arc::clone(&env.clock),
            config.clone(),
        );
        let payments = PaymentCoordinator::new(
            reservations.clone(),
            Arc::clone(&env.balances),
            Arc::clone(&env.locks),
            Arc::clone(&env.clock),
            config.clone(),
        );

        Self {
            ledger,
            queue,
            reservations,
            reaper,
            payments,
            config,
        }
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Scheduler for this engine's promotion and sweep loops, at the configured intervals
    #[must_use]
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.queue.clone(),
            self.reaper.clone(),
            self.config.promote_interval,
            self.config.sweep_interval,
        )
    }
}
