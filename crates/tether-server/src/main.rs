//! # tether
//!
//! Realtime presence, fan-out and voice coordination gateway.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a config file in the working directory
//! tether
//!
//! # Run with environment variables
//! TETHER_PORT=8080 TETHER_HOST=0.0.0.0 TETHER_AUTH__JWT_SECRET=... tether
//! ```

use anyhow::Result;
use tether_server::{config::Config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    config.validate()?;

    tracing::info!("Starting tether on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
