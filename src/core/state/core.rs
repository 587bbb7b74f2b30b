// src/core/state/core.rs

//! Defines the central `BridgeState` struct, the composition root of the engine.

use super::diagnostics::Diagnostics;
use super::readiness::ConnectionStatus;
use crate::config::Config;
use crate::core::bridge::AsyncBridge;
use crate::core::cache::ResponseCache;
use crate::core::epoch::EpochCounter;
use crate::core::locks::LockRegistry;
use crate::core::supervisor;
use crate::core::upstream::{GatewayClient, GatewayEndpoint};
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// All shared state of one bridge instance.
///
/// Built explicitly by the process (or a test) and shared through an `Arc`.
/// Each component guards itself with its own short-held lock; none of them is
/// ever locked while holding another.
pub struct BridgeState<C: GatewayClient> {
    /// The resolved configuration. Immutable after startup.
    pub config: Config,
    pub epoch: Arc<EpochCounter>,
    pub status: Arc<ConnectionStatus>,
    /// Response payloads keyed by category and request identity.
    pub cache: ResponseCache<Value>,
    pub locks: LockRegistry,
    pub diagnostics: Arc<Diagnostics>,
    /// The only path to the gateway client.
    pub bridge: AsyncBridge<C>,
    pub started_at: Instant,
}

impl<C: GatewayClient> BridgeState<C> {
    /// Builds every component from `config`. The loop thread is not started.
    pub fn new(config: Config) -> Self {
        let epoch = Arc::new(EpochCounter::new());
        let cache = ResponseCache::new(config.cache.ttls.clone(), config.cache.default_ttl)
            .with_epoch(epoch.clone());
        let locks = LockRegistry::from_config(&config.locks);
        let bridge = AsyncBridge::new(epoch.clone(), config.bridge.poll_interval);

        Self {
            config,
            epoch,
            status: Arc::new(ConnectionStatus::new()),
            cache,
            locks,
            diagnostics: Arc::new(Diagnostics::new()),
            bridge,
            started_at: Instant::now(),
        }
    }

    /// Starts the loop thread, building the gateway client on it with `factory`.
    /// Gateway events update readiness and diagnostics from the loop thread.
    pub fn start_loop<F>(&self, factory: F) -> Result<()>
    where
        F: FnOnce() -> C + Send + 'static,
    {
        let on_event = supervisor::event_handler(self.status.clone(), self.diagnostics.clone());
        self.bridge.start(factory, on_event)
    }

    /// Clears readiness and stops the loop thread.
    pub fn shutdown(&self) {
        self.status.clear();
        self.bridge.stop();
    }

    pub fn endpoint(&self) -> GatewayEndpoint {
        GatewayEndpoint {
            host: self.config.gateway.host.clone(),
            port: self.config.gateway.port,
            client_id: self.config.gateway.client_id,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}
