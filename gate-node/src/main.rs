use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use gate_node::{api, App, GateConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gate_node=info".into()),
        )
        .with_target(false)
        .init();

    info!("Starting gate-node v{}", env!("CARGO_PKG_VERSION"));

    // Determine config file path - try the workspace root first
    let config_paths = match std::env::var("GATE_CONFIG") {
        Ok(name) => vec![name],
        Err(_) => vec![
            "config/default".to_string(),
            "gate-node/config/default".to_string(),
        ],
    };

    let mut config = None;
    for config_path in &config_paths {
        match GateConfig::from_file(config_path) {
            Ok(loaded) => {
                info!("Configuration loaded from {}", config_path);
                config = Some(loaded);
                break;
            }
            Err(err) => {
                warn!("No configuration at {}: {}", config_path, err);
            }
        }
    }

    let config = config.unwrap_or_else(|| {
        warn!("No configuration file found, using defaults");
        GateConfig::default()
    });

    // Validate configuration
    if let Err(err) = config.validate() {
        error!("Configuration validation failed: {}", err);
        return Err(anyhow::anyhow!("Invalid configuration: {}", err));
    }

    let app = Arc::new(App::new(&config).context("Failed to load domain files")?);
    let router = api::router(app);

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server.listen_addr))?;

    info!(addr = %config.server.listen_addr, "gate-node listening");

    axum::serve(listener, router)
        .await
        .context("Server failed")?;

    Ok(())
}
