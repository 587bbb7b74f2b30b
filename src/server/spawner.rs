// src/server/spawner.rs

//! Spawns the bridge's long-running background workers.

use super::context::ServerContext;
use super::http;
use crate::core::upstream::GatewayClient;
use anyhow::Result;
use tracing::info;

/// Starts the supervisor thread and, if enabled, the HTTP health server.
pub fn spawn_all<C: GatewayClient>(ctx: &mut ServerContext<C>) -> Result<()> {
    ctx.supervisor.spawn()?;

    if ctx.state.config.http.enabled {
        let http_state = ctx.state.clone();
        let shutdown_rx_http = ctx.shutdown_tx.subscribe();
        ctx.background_tasks.spawn(async move {
            http::run_http_server(http_state, shutdown_rx_http).await
        });
    } else {
        info!("HTTP health server is disabled in the configuration.");
    }
    Ok(())
}
