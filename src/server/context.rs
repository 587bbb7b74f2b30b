// src/server/context.rs

use crate::core::state::BridgeState;
use crate::core::supervisor::Supervisor;
use crate::core::upstream::GatewayClient;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Holds everything initialized before the bridge starts serving.
pub struct ServerContext<C: GatewayClient> {
    pub state: Arc<BridgeState<C>>,
    pub supervisor: Arc<Supervisor<C>>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
}
