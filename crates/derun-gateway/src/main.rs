//! Gateway client entry point
//!
//! Run with:
//! ```bash
//! DERUN_TOKEN=... cargo run -p derun-gateway
//! ```
//!
//! Configuration is loaded from environment variables. Every shard is
//! started, dispatches are logged, and Ctrl-C shuts the shards down.

use anyhow::Context;
use derun_common::{try_init_tracing, ClientConfig};
use derun_gateway::ShardManager;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    // Initialize tracing
    if let Err(e) = try_init_tracing() {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    if let Err(e) = run().await {
        error!(error = %e, "Gateway client failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    info!("Starting gateway client...");

    let config = ClientConfig::from_env().context("Failed to load configuration")?;
    info!(
        url = %config.gateway.url,
        shard_count = ?config.gateway.shard_count,
        intents = ?config.gateway.intents,
        "Configuration loaded"
    );

    let manager = ShardManager::new_shared(config)?;

    manager.on_ready(|| info!("All shards ready"))?;
    manager.on_shard_ready(|shard_id, ready| {
        info!(
            shard_id,
            user = %ready.user.username,
            guilds = ready.guilds.len(),
            "Shard ready"
        );
    })?;
    manager.on_shard_error(|shard_id, error| {
        warn!(shard_id, code = error.code(), error = %error, "Shard error");
    })?;
    manager.on_dispatch(|shard_id, event, _| {
        tracing::debug!(shard_id, event, "Dispatch");
    })?;

    manager.launch().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown signal received");

    manager.shutdown().await;
    Ok(())
}
