//! PulseRide - heart-rate driven ERG control for BLE smart trainers.
//!
//! Main entry point for the application.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting PulseRide v{}", env!("CARGO_PKG_VERSION"));

    let config = pulseride::storage::config::load_config()?;

    pulseride::app::run(config).await
}
