//! # Chime Server
//!
//! Chat service that delivers every message to connected members in realtime
//! and sends one debounced notification per burst to members who are offline.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! chime
//!
//! # Run with environment variables
//! CHIME_PORT=8080 CHIME_DISPATCH__NOTIFICATION_SEND_DELAY_SECS=30 chime
//! ```

mod config;
mod handlers;
mod metrics;
mod realtime;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chime=debug,chime_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!(
        delay_secs = config.dispatch.notification_send_delay_secs,
        "Starting Chime server on {}:{}",
        config.host,
        config.port
    );

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
