use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use studyrelay_common::GatewayConfig;
use studyrelay_protocol::sim::{SimConnector, SimScp};
use studyrelay_server::gateway::Gateway;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("studyrelay=info".parse()?))
        .init();

    info!("studyrelay gateway starting...");

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("STUDYRELAY_CONFIG").ok())
        .unwrap_or_else(|| "studyrelay.toml".to_string());
    let config = load_config(&PathBuf::from(&config_path))
        .with_context(|| format!("loading configuration from {config_path}"))?;
    info!(
        routes = config.routes.len(),
        destinations = config.destinations.len(),
        brokers = config.brokers.len(),
        "Configuration loaded"
    );

    // The wire stack is an injected collaborator. The in-process sim
    // stack serves development and testing; a production DIMSE stack
    // implements the same two traits and replaces it here.
    warn!("Running with the in-process sim wire stack; peer traffic is simulated");
    let scp = Arc::new(SimScp);
    let connector = Arc::new(SimConnector::new(config.cache_dir.join("sim-peers")));

    let gateway = Gateway::build(config, scp, connector).await?;
    gateway.run_until_shutdown().await
}

fn load_config(path: &std::path::Path) -> Result<GatewayConfig> {
    let raw = std::fs::read_to_string(path)?;
    let mut config: GatewayConfig = toml::from_str(&raw)?;

    // Environment overrides for the paths, the usual deployment knobs.
    if let Ok(base) = std::env::var("STUDYRELAY_BASE_DIR") {
        config.base_dir = PathBuf::from(base);
    }
    if let Ok(cache) = std::env::var("STUDYRELAY_CACHE_DIR") {
        config.cache_dir = PathBuf::from(cache);
    }
    Ok(config)
}
