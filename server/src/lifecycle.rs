//! Application lifecycle management and graceful shutdown.
//!
//! [`Application::build`] wires the engine to the configured backends;
//! [`Application::run`] starts the background loops and waits for a shutdown signal.
//!
//! # Graceful Shutdown
//!
//! When a shutdown signal is received (Ctrl+C or SIGTERM):
//! 1. Shutdown signal broadcast to the promoter, reaper and lease purger
//! 2. Wait for each loop to finish its current pass (configurable timeout)
//! 3. Clean exit
//!
//! Holds and tokens left behind are reclaimed by the next sweep after restart, since
//! every deadline is stored with its record.

use seatlock_core::environment::{Clock, SystemClock};
use seatlock_core::{LockCoordinator, TracingNotifier};
use seatlock_postgres::{PostgresLockCoordinator, PostgresStores};
use seatlock_redis::RedisLockCoordinator;
use seatlock_runtime::metrics::MetricsServer;
use seatlock_runtime::{Engine, EngineEnvironment, LocalLockCoordinator};
use seatlock_testing::{
    InMemoryAdmissionTokenRepository, InMemoryBalanceLedger, InMemoryReservationRepository,
    InMemorySeatRepository,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::config::{Config, LockBackend, StorageBackend};
use crate::error::StartupError;

/// Running application with all background tasks.
pub struct Application {
    engine: Engine,
    /// Set when leases live in `PostgreSQL`; lapsed rows are purged periodically
    lease_table: Option<PostgresLockCoordinator>,
    shutdown_tx: broadcast::Sender<()>,
    config: Arc<Config>,
}

impl Application {
    /// Connects the configured backends and wires the engine.
    ///
    /// # Errors
    ///
    /// [`StartupError`] if a backend cannot be reached or migrated.
    pub async fn build(config: Config) -> Result<Self, StartupError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let notifier = Arc::new(TracingNotifier);

        let (mut env, postgres) = match config.storage {
            StorageBackend::Memory => {
                info!("Using in-memory storage");
                let env = EngineEnvironment::new(
                    Arc::new(InMemorySeatRepository::new()),
                    Arc::new(InMemoryReservationRepository::new()),
                    Arc::new(InMemoryAdmissionTokenRepository::new()),
                    Arc::new(InMemoryBalanceLedger::new(Arc::clone(&clock))),
                    Arc::new(LocalLockCoordinator::new(Arc::clone(&clock))),
                    notifier,
                    Arc::clone(&clock),
                );
                (env, None)
            }
            StorageBackend::Postgres => {
                info!(max_connections = config.postgres.max_connections, "Connecting to PostgreSQL");
                let pool =
                    seatlock_postgres::connect(&config.postgres.url, config.postgres.max_connections)
                        .await?;
                let stores = PostgresStores::new(pool, Arc::clone(&clock));
                stores.migrate().await?;
                let env = EngineEnvironment::new(
                    Arc::new(stores.seats.clone()),
                    Arc::new(stores.reservations.clone()),
                    Arc::new(stores.tokens.clone()),
                    Arc::new(stores.balances.clone()),
                    Arc::new(LocalLockCoordinator::new(Arc::clone(&clock))),
                    notifier,
                    Arc::clone(&clock),
                );
                (env, Some(stores))
            }
        };

        let lease_table = match (config.locks, postgres) {
            (LockBackend::Local, _) => None,
            (LockBackend::Redis, _) => {
                info!("Using Redis leases");
                let locks: Arc<dyn LockCoordinator> =
                    Arc::new(RedisLockCoordinator::new(&config.redis.url).await?);
                env.locks = locks;
                None
            }
            (LockBackend::Postgres, Some(stores)) => {
                info!("Using PostgreSQL leases");
                let locks: Arc<dyn LockCoordinator> = Arc::new(stores.locks.clone());
                env.locks = locks;
                Some(stores.locks)
            }
            (LockBackend::Postgres, None) => {
                return Err(StartupError::Config(
                    "postgres locks require postgres storage".to_string(),
                ));
            }
        };

        let engine = Engine::new(env, config.engine.to_engine_config());
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            engine,
            lease_table,
            shutdown_tx,
            config: Arc::new(config),
        })
    }

    /// The wired engine
    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Run the application until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// [`StartupError`] if the metrics exporter cannot be started.
    pub async fn run(self) -> Result<(), StartupError> {
        self.run_until(shutdown_signal()).await
    }

    /// Run the application until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// [`StartupError`] if the metrics exporter cannot be started.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), StartupError> {
        if self.config.server.metrics_enabled {
            let mut metrics = MetricsServer::new(self.config.metrics_addr()?);
            metrics.start()?;
        }

        let mut handles = self.engine.scheduler().spawn(&self.shutdown_tx);
        if let Some(lease_table) = self.lease_table {
            handles.push(tokio::spawn(purge_leases(
                lease_table,
                self.engine.config().sweep_interval,
                self.shutdown_tx.subscribe(),
            )));
        }
        info!(task_count = handles.len(), "Background tasks started");

        shutdown.await;
        info!("Shutdown requested, stopping background tasks...");

        // Receivers may already be gone if every task ended early
        let _ = self.shutdown_tx.send(());
        Self::await_shutdown(handles, Duration::from_secs(self.config.server.shutdown_timeout)).await;

        info!("Graceful shutdown complete");
        Ok(())
    }

    /// Wait for all background tasks, giving each `timeout` to finish its current pass.
    async fn await_shutdown(handles: Vec<JoinHandle<()>>, timeout: Duration) {
        for (idx, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(task = idx, "Task stopped gracefully"),
                Ok(Err(e)) => warn!(task = idx, error = %e, "Task failed"),
                Err(_) => warn!(task = idx, "Task shutdown timed out"),
            }
        }
    }
}

/// Deletes lapsed lease rows every `interval` until shutdown.
async fn purge_leases(
    locks: PostgresLockCoordinator,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            _ = ticker.tick() => match locks.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!(purged, "Purged lapsed leases"),
                Err(e) => tracing::error!(error = %e, "Lease purge failed"),
            },
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// If a handler cannot be installed, that signal is simply never observed.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
