//! Canopy control service binary.
//!
//! Runs the control plane for canister deployments, cycles top-ups, and
//! custom domains.

use tracing::info;
use tracing_subscriber::EnvFilter;

use canopy_control::{CanopyConfig, CanopyService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("canopy_control=info".parse()?),
        )
        .init();

    info!("canopy control service starting");

    // Load configuration
    let config = CanopyConfig::load().unwrap_or_else(|e| {
        info!(error = %e, "failed to load config, using defaults");
        CanopyConfig::default()
    });

    info!(
        listen_addr = %config.server.listen_addr,
        database = %config.database.url,
        canister_url = %config.canister.url,
        registration_url = %config.registration.base_url,
        "configuration loaded"
    );

    let service = CanopyService::new(config);
    service.run().await?;

    Ok(())
}
