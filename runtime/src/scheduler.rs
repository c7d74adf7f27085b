//! Fixed-interval driver for promotion passes and reaper sweeps.
//!
//! Both entry points are idempotent, so missed ticks are simply delayed rather than
//! replayed in a burst.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::admission::AdmissionQueue;
use crate::reaper::ExpiryReaper;

/// Background loops for [`AdmissionQueue::promote_all`] and [`ExpiryReaper::sweep`].
///
/// # Example
///
/// ```rust,ignore
/// let (shutdown_tx, _) = broadcast::channel(1);
/// let handles = Scheduler::new(queue, reaper, promote_every, sweep_every)
///     .spawn(&shutdown_tx);
/// // ...
/// let _ = shutdown_tx.send(());
/// ```
pub struct Scheduler {
    queue: AdmissionQueue,
    reaper: ExpiryReaper,
    promote_interval: Duration,
    sweep_interval: Duration,
}

impl Scheduler {
    /// Creates a scheduler
    #[must_use]
    pub const fn new(
        queue: AdmissionQueue,
        reaper: ExpiryReaper,
        promote_interval: Duration,
        sweep_interval: Duration,
    ) -> Self {
        Self {
            queue,
            reaper,
            promote_interval,
            sweep_interval,
        }
    }

    /// Spawns both loops. Each stops when `shutdown` broadcasts.
    #[must_use]
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let queue = self.queue;
        let reaper = self.reaper;
        vec![
            tokio::spawn(run_loop(
                "promoter",
                self.promote_interval,
                shutdown.subscribe(),
                move || {
                    let queue = queue.clone();
                    async move {
                        if let Err(e) = queue.promote_all().await {
                            tracing::error!(error = %e, "Promotion pass failed");
                        }
                    }
                },
            )),
            tokio::spawn(run_loop(
                "reaper",
                self.sweep_interval,
                shutdown.subscribe(),
                move || {
                    let reaper = reaper.clone();
                    async move {
                        if let Err(e) = reaper.sweep().await {
                            tracing::error!(error = %e, "Sweep failed");
                        }
                    }
                },
            )),
        ]
    }
}

async fn run_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(task = name, period_ms = period.as_millis(), "Scheduled task started");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!(task = name, "Scheduled task received shutdown signal");
                break;
            }
            _ = interval.tick() => tick().await,
        }
    }

    tracing::info!(task = name, "Scheduled task stopped");
}
