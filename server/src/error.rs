//! Startup failures.

use seatlock_core::{LeaseError, RepositoryError};
use seatlock_runtime::metrics::MetricsError;
use thiserror::Error;

/// Errors that stop the process before it starts serving.
#[derive(Error, Debug)]
pub enum StartupError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage could not be opened or migrated
    #[error("Storage error: {0}")]
    Storage(#[from] RepositoryError),

    /// Lease backend could not be reached
    #[error("Lease backend error: {0}")]
    Lease(#[from] LeaseError),

    /// Metrics exporter could not be installed
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),
}
