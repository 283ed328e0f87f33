//! Entry point: config -> logging -> block log open/recover -> connection
//! manager -> sync manager -> shutdown signal handling, the same order the
//! reference node builds up its services in before it starts accepting
//! connections.

mod chain;
mod config;
mod genesis;
mod logging;
mod node_service;

use anyhow::Context;
use config::NodeConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = NodeConfig::parse_args();
    config.validate().context("invalid configuration")?;

    logging::init(&config.log_level);

    tracing::info!(data_dir = %config.data_dir.display(), chain_id = %config.chain_id, "starting node");

    let mut service = node_service::NodeService::start(config).await.context("failed to start node")?;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received");
    service.shutdown().await;

    Ok(())
}
