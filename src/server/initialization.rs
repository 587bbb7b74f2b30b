// src/server/initialization.rs

//! Builds the bridge state and starts the gateway loop before anything else runs.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::BridgeState;
use crate::core::supervisor::{FatalHandler, Supervisor};
use crate::core::upstream::GatewayClient;
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

/// Initializes all bridge components. The loop thread is running when this returns;
/// the supervisor and HTTP server are not started yet.
pub fn setup<C, F>(config: Config, factory: F, fatal: Arc<dyn FatalHandler>) -> Result<ServerContext<C>>
where
    C: GatewayClient,
    F: FnOnce() -> C + Send + 'static,
{
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let state = Arc::new(BridgeState::new(config));
    state
        .start_loop(factory)
        .context("Failed to start the gateway loop")?;
    info!("Bridge state initialized.");

    let supervisor = Arc::new(Supervisor::new(state.clone(), fatal));

    Ok(ServerContext {
        state,
        supervisor,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

fn log_startup_info(config: &Config) {
    let gateway = &config.gateway;
    info!(
        "Bridge config: host={} port={} clientId={} clientType={} tradingMode={}",
        gateway.host, gateway.port, gateway.client_id, gateway.client_type, gateway.trading_mode
    );
    for (group, capacity) in &config.locks.capacities {
        info!("Lock group '{group}' capacity {capacity}.");
    }
}
