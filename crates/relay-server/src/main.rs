//! # Payrelay Server
//!
//! WebSocket relay that fans payment events out to the other members of a
//! channel.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! payrelay
//!
//! # Run with a specific config file
//! PAYRELAY_CONFIG=/path/to/payrelay.toml payrelay
//!
//! # Run with environment variables
//! PAYRELAY_PORT=8080 PAYRELAY_HOST=0.0.0.0 payrelay
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
                .unwrap_or_else(|_| "payrelay=debug,payrelay_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Payrelay server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
