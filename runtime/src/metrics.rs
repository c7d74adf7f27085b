//! Prometheus metrics for the reservation engine.
//!
//! Engine components record through the `metrics` facade; nothing is exported until
//! [`MetricsServer::start`] installs the Prometheus recorder. Without a recorder the
//! calls are no-ops, which is what tests rely on.
//!
//! # Example
//!
//! ```rust,no_run
//! use seatlock_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use seatlock_core::{LEASE_ACQUIRE_METRIC, LEDGER_ENTRIES_METRIC};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics exporter.
///
/// Serves the scrape endpoint on `addr`.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the exporter.
    ///
    /// Must run inside a tokio runtime: the exporter spawns its HTTP listener there.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built. A recorder that is already
    /// installed is not an error; the call then only logs a warning.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let (recorder, exporter) = builder
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                register_metrics();
                let addr = self.addr;
                tokio::spawn(async move {
                    // The exporter's error type has no Debug or Display to log
                    if exporter.await.is_err() {
                        tracing::error!(addr = %addr, "Metrics exporter stopped");
                    }
                });
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics exporter started");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Metrics recorder already initialized, skipping re-initialization");
                Ok(())
            }
        }
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

fn register_metrics() {
    describe_counter!(
        "seatlock_holds_total",
        "Hold attempts by outcome (held, not_available, contended, admission_required, error)"
    );
    describe_counter!(
        "seatlock_reservations_total",
        "Reservation transitions by resulting status"
    );
    describe_counter!(
        "seatlock_lease_contention_total",
        "Lease acquisitions refused because another holder owns the key"
    );
    describe_counter!(
        LEASE_ACQUIRE_METRIC,
        "Lease acquisition attempts by backend and whether they were granted"
    );
    describe_counter!(LEDGER_ENTRIES_METRIC, "Balance ledger entries appended by kind");
    describe_counter!(
        "seatlock_tokens_total",
        "Admission token transitions by resulting status"
    );
    describe_counter!("seatlock_payments_total", "Payment attempts by outcome");
    describe_counter!(
        "seatlock_sweep_records_total",
        "Records handled by the expiry reaper by kind and outcome"
    );
    describe_histogram!(
        "seatlock_sweep_duration_seconds",
        "Time taken by one reaper sweep"
    );
    describe_gauge!(
        "seatlock_active_tokens",
        "Active admission tokens per scope after the last promotion"
    );
}

/// Hold outcome.
pub fn record_hold(outcome: &'static str) {
    counter!("seatlock_holds_total", "outcome" => outcome).increment(1);
}

/// Reservation status change.
pub fn record_reservation(status: &'static str) {
    counter!("seatlock_reservations_total", "status" => status).increment(1);
}

/// Lease refused on contention.
pub fn record_contention(operation: &'static str) {
    counter!("seatlock_lease_contention_total", "operation" => operation).increment(1);
}

/// Lease acquisition attempt against `backend`.
pub fn record_lease_acquire(backend: &'static str, granted: bool) {
    counter!(
        LEASE_ACQUIRE_METRIC,
        "backend" => backend,
        "granted" => if granted { "true" } else { "false" }
    )
    .increment(1);
}

/// Token status change.
pub fn record_token(status: &'static str, count: u64) {
    counter!("seatlock_tokens_total", "status" => status).increment(count);
}

/// Payment outcome.
pub fn record_payment(outcome: &'static str) {
    counter!("seatlock_payments_total", "outcome" => outcome).increment(1);
}

/// Reaper record outcome.
pub fn record_sweep_record(kind: &'static str, outcome: &'static str, count: u64) {
    counter!("seatlock_sweep_records_total", "kind" => kind, "outcome" => outcome)
        .increment(count);
}

/// Reaper sweep duration.
pub fn record_sweep_duration(duration: Duration) {
    histogram!("seatlock_sweep_duration_seconds").record(duration.as_secs_f64());
}

/// Active tokens in a scope.
#[allow(clippy::cast_precision_loss)]
pub fn record_active_tokens(scope: &str, active: u64) {
    gauge!("seatlock_active_tokens", "scope" => scope.to_string()).set(active as f64);
}
