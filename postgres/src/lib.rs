//! `PostgreSQL` backend for the Seatlock engine.
//!
//! Implements every storage collaborator from `seatlock-core` on one connection pool:
//!
//! - [`PostgresSeatRepository`], [`PostgresReservationRepository`],
//!   [`PostgresAdmissionTokenRepository`]
//! - [`PostgresBalanceLedger`]: row-locked balances with an append-only entry log
//! - [`PostgresLockCoordinator`]: leases as rows that may only be taken over once lapsed
//!
//! Queries are built at runtime with `sqlx::query`, so no database is needed to compile.
//!
//! # Example
//!
//! ```ignore
//! use seatlock_postgres::{PostgresStores, connect};
//!
//! let pool = connect("postgres://localhost/seatlock", 10).await?;
//! let stores = PostgresStores::new(pool, clock);
//! stores.migrate().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use seatlock_core::RepositoryError;
use seatlock_core::environment::Clock;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;

mod balance;
mod codec;
mod lock;
mod reservations;
mod seats;
mod tokens;

pub use balance::PostgresBalanceLedger;
pub use lock::PostgresLockCoordinator;
pub use reservations::PostgresReservationRepository;
pub use seats::PostgresSeatRepository;
pub use tokens::PostgresAdmissionTokenRepository;

/// Opens a connection pool.
///
/// # Errors
///
/// [`RepositoryError::Storage`] if no connection can be established.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool, RepositoryError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| RepositoryError::Storage(format!("Failed to connect: {e}")))
}

/// Every Postgres-backed collaborator, sharing one pool.
#[derive(Clone)]
pub struct PostgresStores {
    pool: PgPool,
    /// Seats
    pub seats: PostgresSeatRepository,
    /// Reservations
    pub reservations: PostgresReservationRepository,
    /// Admission tokens
    pub tokens: PostgresAdmissionTokenRepository,
    /// Balances
    pub balances: PostgresBalanceLedger,
    /// Leases
    pub locks: PostgresLockCoordinator,
}

impl PostgresStores {
    /// Builds all repositories over `pool`. Ledger entries are stamped with `clock`.
    #[must_use]
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            seats: PostgresSeatRepository::new(pool.clone()),
            reservations: PostgresReservationRepository::new(pool.clone()),
            tokens: PostgresAdmissionTokenRepository::new(pool.clone()),
            balances: PostgresBalanceLedger::new(pool.clone(), clock),
            locks: PostgresLockCoordinator::new(pool.clone()),
            pool,
        }
    }

    /// Runs the schema migrations.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::Storage`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RepositoryError::Storage(format!("Migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// The underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}
