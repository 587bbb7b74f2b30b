// src/server/mod.rs

use crate::config::Config;
use crate::core::supervisor::{FatalHandler, ProcessExit};
use crate::core::upstream::GatewayClient;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};

mod context;
pub mod http;
mod initialization;
mod spawner;

pub use context::ServerContext;

/// The main startup function, orchestrating all setup phases. Runs until
/// SIGINT/SIGTERM or until a background task fails.
pub async fn run<C, F>(config: Config, factory: F) -> Result<()>
where
    C: GatewayClient,
    F: FnOnce() -> C + Send + 'static,
{
    run_with_fatal_handler(config, factory, Arc::new(ProcessExit)).await
}

/// `run` with an explicit handler for the supervisor's fatal path.
pub async fn run_with_fatal_handler<C, F>(config: Config, factory: F, fatal: Arc<dyn FatalHandler>) -> Result<()>
where
    C: GatewayClient,
    F: FnOnce() -> C + Send + 'static,
{
    // 1. Build the state and start the gateway loop.
    let mut ctx = initialization::setup(config, factory, fatal)?;

    // 2. Start the supervisor and the health server.
    spawner::spawn_all(&mut ctx)?;

    // 3. Wait for a shutdown signal.
    wait_for_shutdown(&mut ctx).await?;

    // 4. Tear down in reverse order.
    shutdown(ctx).await;
    Ok(())
}

async fn wait_for_shutdown<C: GatewayClient>(ctx: &mut ServerContext<C>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, initiating graceful shutdown."),
        _ = sigterm.recv() => info!("SIGTERM received, initiating graceful shutdown."),
        Some(res) = ctx.background_tasks.join_next() => match res {
            Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
            Ok(Err(e)) => error!("CRITICAL: Background task failed: {e}. Shutting down."),
            Err(e) => error!("CRITICAL: Background task panicked: {e:?}. Shutting down."),
        },
    }
    Ok(())
}

async fn shutdown<C: GatewayClient>(mut ctx: ServerContext<C>) {
    info!("Shutting down. Sending signal to all tasks.");
    if ctx.shutdown_tx.send(()).is_err() {
        warn!("No task was listening for the shutdown signal.");
    }

    // Both joins block on OS threads.
    let supervisor = ctx.supervisor.clone();
    let state = ctx.state.clone();
    let teardown = tokio::task::spawn_blocking(move || {
        supervisor.stop();
        state.shutdown();
    });
    if let Err(e) = teardown.await {
        error!("Bridge teardown panicked: {e:?}");
    }

    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    }
    info!("Bridge shutdown complete.");
}
