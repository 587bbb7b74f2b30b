// src/server/http.rs

//! The read-only HTTP surface: `/ping`, `/health`, `/diag` and `/metrics`.
//!
//! No handler touches the loop thread, so these endpoints stay responsive while
//! the gateway connection is wedged.

use crate::core::health::{diag_snapshot, health_snapshot};
use crate::core::metrics::{self, gather_metrics};
use crate::core::state::BridgeState;
use crate::core::upstream::GatewayClient;
use anyhow::{Context, Result};
use axum::{Json, Router, http::StatusCode, response::IntoResponse, routing::get};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::info;

async fn ping_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": Utc::now().timestamp_millis() }))
}

async fn health_handler<C: GatewayClient>(state: Arc<BridgeState<C>>) -> impl IntoResponse {
    Json(health_snapshot(&state))
}

async fn diag_handler<C: GatewayClient>(state: Arc<BridgeState<C>>) -> impl IntoResponse {
    Json(diag_snapshot(&state))
}

/// Refreshes the state gauges, then encodes every registered metric.
async fn metrics_handler<C: GatewayClient>(state: Arc<BridgeState<C>>) -> impl IntoResponse {
    metrics::READY.set(if state.status.is_ready() { 1.0 } else { 0.0 });
    metrics::EPOCH.set(state.epoch.current() as f64);

    let body = gather_metrics();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}

/// Builds the router over a shared bridge state.
pub fn router<C: GatewayClient>(state: Arc<BridgeState<C>>) -> Router {
    let health_state = state.clone();
    let diag_state = state.clone();
    let metrics_state = state;
    Router::new()
        .route("/ping", get(ping_handler))
        .route("/health", get(move || health_handler(health_state.clone())))
        .route("/diag", get(move || diag_handler(diag_state.clone())))
        .route("/metrics", get(move || metrics_handler(metrics_state.clone())))
}

/// Serves the router on an already-bound listener until `shutdown_rx` fires.
pub async fn serve<C: GatewayClient>(
    listener: TcpListener,
    state: Arc<BridgeState<C>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("HTTP health server shutting down.");
        })
        .await
        .context("HTTP health server failed")
}

/// Binds the configured address and serves the health surface.
pub async fn run_http_server<C: GatewayClient>(
    state: Arc<BridgeState<C>>,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP health server on {addr}"))?;
    info!("HTTP health server listening on http://{addr}");
    serve(listener, state, shutdown_rx).await
}
