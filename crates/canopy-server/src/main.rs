//! # Canopy relay
//!
//! Real-time sensor telemetry relay with a live browser dashboard.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! canopy
//!
//! # Run with custom config
//! # (first of canopy.toml, /etc/canopy/canopy.toml, ~/.config/canopy/canopy.toml)
//!
//! # Run with environment variables
//! CANOPY_PORT=8080 CANOPY_HOST=0.0.0.0 canopy
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "canopy=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Canopy relay on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
