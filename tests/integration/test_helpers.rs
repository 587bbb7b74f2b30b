// tests/integration/test_helpers.rs

//! Test helpers and utilities for bridge tests

#![allow(dead_code)]

use gatebridge::config::Config;
use gatebridge::core::state::BridgeState;
use gatebridge::core::supervisor::{FatalHandler, Supervisor};
use gatebridge::core::upstream::{SimulatedGateway, SimulatorControl};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

/// Records fatal signals instead of exiting the test process.
#[derive(Debug, Default)]
pub struct RecordingFatal {
    calls: AtomicUsize,
    reasons: Mutex<Vec<String>>,
}

impl RecordingFatal {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().clone()
    }
}

impl FatalHandler for RecordingFatal {
    fn fatal(&self, reason: &str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reasons.lock().push(reason.to_string());
    }
}

/// A configuration with every timing shrunk so tests run in milliseconds.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.supervisor.connect_timeout = Duration::from_secs(2);
    config.supervisor.heartbeat_interval = Duration::from_millis(20);
    config.supervisor.heartbeat_timeout = Duration::from_millis(200);
    config.supervisor.reconnect_interval = Duration::from_millis(20);
    config.supervisor.stabilization_delay = Duration::from_millis(10);
    config.supervisor.tick_interval = Duration::from_millis(10);
    config.supervisor.heartbeat_failures_before_exit = 3;
    config.bridge.poll_interval = Duration::from_millis(10);
    config.bridge.invoke_timeout = Duration::from_secs(1);
    config.bridge.request_timeout = Duration::from_secs(2);
    config.locks.acquire_timeout = Duration::from_millis(500);
    config.locks.retry_attempts = 3;
    config.locks.retry_backoff = Duration::from_millis(10);
    config.http.enabled = false;
    config
        .cache
        .ttls
        .insert("quotes".to_string(), Duration::from_millis(100));
    config
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_test_writer()
        .try_init();
}

/// TestContext provides a bridge with a running loop over a simulated gateway.
pub struct TestContext {
    pub state: Arc<BridgeState<SimulatedGateway>>,
    pub control: SimulatorControl,
    pub supervisor: Arc<Supervisor<SimulatedGateway>>,
    pub fatal: Arc<RecordingFatal>,
}

impl TestContext {
    /// Creates a context with the test configuration; the gateway is not connected yet.
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: Config) -> Self {
        init_tracing();

        let state = Arc::new(BridgeState::new(config));
        let control = SimulatorControl::new();
        let factory_control = control.clone();
        state
            .start_loop(move || factory_control.gateway())
            .expect("Failed to start the gateway loop");

        let fatal = Arc::new(RecordingFatal::default());
        let supervisor = Arc::new(Supervisor::new(state.clone(), fatal.clone()));

        Self {
            state,
            control,
            supervisor,
            fatal,
        }
    }

    /// Creates a context whose gateway is connected and `Ready` at epoch 1.
    pub fn connected() -> Self {
        Self::connected_with_config(test_config())
    }

    pub fn connected_with_config(config: Config) -> Self {
        let ctx = Self::with_config(config);
        let epoch = ctx
            .supervisor
            .try_connect()
            .expect("Failed to connect to the simulated gateway");
        assert_eq!(epoch, 1);
        ctx
    }

    pub fn epoch(&self) -> u64 {
        self.state.epoch.current()
    }

    pub fn is_ready(&self) -> bool {
        self.state.status.is_ready()
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        self.supervisor.stop();
        self.state.shutdown();
    }
}

/// Polls `condition` every 5ms until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
