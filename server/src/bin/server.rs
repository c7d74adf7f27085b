//! Seatlock Server
//!
//! Runs the reservation engine's background loops (admission promotion, expiry sweeps)
//! against the configured backends until Ctrl+C or SIGTERM.
//!
//! # Usage
//!
//! ```bash
//! SEATLOCK_STORAGE=postgres SEATLOCK_LOCKS=redis cargo run --bin server
//! ```

use seatlock_server::{Application, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,seatlock=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Seatlock server...");

    let config = Config::from_env()?;
    tracing::info!(
        storage = ?config.storage,
        locks = ?config.locks,
        scope_capacity = config.engine.scope_capacity,
        "Configuration loaded"
    );

    let app = Application::build(config).await?;
    tracing::info!("Application initialized; press Ctrl+C to shut down");

    app.run().await?;
    Ok(())
}
