//! Session Hub Server
//!
//! Authenticated WebSocket hub that relays every message to all clients.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use session_hub::{
    network::{AuthConfig, HubConfig, HubError, HubServer, JwtVerifier},
    VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Session Hub v{}", VERSION);

    let config = HubConfig::from_env().context("loading hub configuration")?;

    // A hub without a trust root would admit nobody
    let auth_config = AuthConfig::from_env();
    let verifier = match JwtVerifier::new(&auth_config) {
        Ok(v) => v,
        Err(e) => {
            error!("Token verifier unavailable: {}", e);
            return Err(HubError::VerifierUnavailable(e).into());
        }
    };

    info!(
        "Max connections: {}, origin included: {}, evict on failure: {}",
        config.max_connections, config.relay.include_origin, config.relay.evict_on_failure
    );

    let server = Arc::new(HubServer::new(config, Arc::new(verifier)));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await.context("running hub server")?;

    info!("Session hub stopped");
    Ok(())
}
