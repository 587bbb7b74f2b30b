// src/core/health.rs

//! Read-only health and diagnostic snapshots.
//!
//! Building a snapshot never touches the loop thread: `connected` is the last
//! liveness value the supervisor observed, so health checks stay cheap even
//! while the gateway is wedged.

use crate::config::{BridgeConfig, ClientType, SupervisorConfig, TradingMode};
use crate::core::bridge::LoopStatsSnapshot;
use crate::core::locks::LockSnapshot;
use crate::core::state::{BridgeState, ConnectionState, DiagnosticsSnapshot};
use crate::core::upstream::GatewayClient;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySummary {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    pub client_type: ClientType,
    pub trading_mode: TradingMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    /// `ok` when ready, `disconnected` otherwise.
    pub status: &'static str,
    pub ready: bool,
    pub state: ConnectionState,
    pub connected: bool,
    pub epoch: u64,
    pub ready_since_epoch: Option<u64>,
    pub uptime_secs: u64,
    pub gateway: GatewaySummary,
    pub locks: BTreeMap<String, LockSnapshot>,
    pub cache_entries: BTreeMap<String, usize>,
    pub diagnostics: DiagnosticsSnapshot,
}

/// `HealthSnapshot` plus loop statistics and the effective timing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagSnapshot {
    #[serde(flatten)]
    pub health: HealthSnapshot,
    #[serde(rename = "loop")]
    pub loop_stats: LoopStatsSnapshot,
    pub supervisor: SupervisorConfig,
    pub bridge: BridgeConfig,
}

pub fn health_snapshot<C: GatewayClient>(state: &BridgeState<C>) -> HealthSnapshot {
    let gateway = &state.config.gateway;
    let ready = state.status.is_ready();
    HealthSnapshot {
        status: if ready { "ok" } else { "disconnected" },
        ready,
        state: state.status.state(),
        connected: state.diagnostics.last_liveness(),
        epoch: state.epoch.current(),
        ready_since_epoch: state.status.ready_since_epoch(),
        uptime_secs: state.uptime().as_secs(),
        gateway: GatewaySummary {
            host: gateway.host.clone(),
            port: gateway.port,
            client_id: gateway.client_id,
            client_type: gateway.client_type,
            trading_mode: gateway.trading_mode,
        },
        locks: state.locks.snapshot(),
        cache_entries: state.cache.entry_counts(),
        diagnostics: state.diagnostics.snapshot(),
    }
}

pub fn diag_snapshot<C: GatewayClient>(state: &BridgeState<C>) -> DiagSnapshot {
    DiagSnapshot {
        health: health_snapshot(state),
        loop_stats: state.bridge.stats(),
        supervisor: state.config.supervisor.clone(),
        bridge: state.config.bridge.clone(),
    }
}
