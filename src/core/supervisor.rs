// src/core/supervisor.rs

//! The connection supervisor.
//!
//! A background thread iterating roughly once per `tick_interval`. Each tick:
//!
//! 1. If the client reports no live connection, readiness is cleared and a
//!    connect is attempted through the bridge. After a settle delay the
//!    liveness is re-checked; only a confirmed connection bumps the epoch and
//!    promotes the state to `Ready`.
//! 2. Otherwise, when a heartbeat is due, one current-time round-trip is made.
//!    Success resets the failure count and re-promotes to `Ready` if needed.
//!    Failure clears readiness; once `heartbeat_failures_before_exit`
//!    consecutive failures accumulate the supervisor disconnects and hands
//!    over to its `FatalHandler`, which by default ends the process so an
//!    external process manager can restart it.
//!
//! A liveness query that cannot reach the loop thread counts as a heartbeat
//! failure, not as a lost connection: a wedged loop must end in the fatal
//! path instead of an endless reconnect cycle.
//!
//! Disconnect events pushed by the client clear readiness immediately, outside
//! the tick cadence (see `event_handler`).

use crate::core::bridge::EventHandler;
use crate::core::errors::{BridgeError, UpstreamError};
use crate::core::metrics;
use crate::core::state::{BridgeState, ConnectionStatus, Diagnostics};
use crate::core::upstream::{GatewayClient, GatewayEvent, is_informational};
use anyhow::{Context, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Receives the supervisor's one and only fatal signal.
pub trait FatalHandler: Send + Sync {
    fn fatal(&self, reason: &str);
}

/// Terminates the process with exit code 1.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExit;

impl FatalHandler for ProcessExit {
    fn fatal(&self, reason: &str) {
        error!("Fatal: {reason}. Exiting so the process manager can restart the bridge.");
        std::process::exit(1);
    }
}

/// How long the graceful disconnect on the fatal path may take to start.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
struct SupervisorState {
    last_heartbeat: Option<Instant>,
    consecutive_failures: u64,
    terminated: bool,
}

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Drives the connection state machine for one `BridgeState`.
pub struct Supervisor<C: GatewayClient> {
    state: Arc<BridgeState<C>>,
    fatal: Arc<dyn FatalHandler>,
    connect_guard: Mutex<()>,
    inner: Mutex<SupervisorState>,
    stop: StopSignal,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<C: GatewayClient> Supervisor<C> {
    pub fn new(state: Arc<BridgeState<C>>, fatal: Arc<dyn FatalHandler>) -> Self {
        Self {
            state,
            fatal,
            connect_guard: Mutex::new(()),
            inner: Mutex::new(SupervisorState::default()),
            stop: StopSignal::default(),
            thread: Mutex::new(None),
        }
    }

    /// A supervisor that exits the process on fatal heartbeat loss.
    pub fn with_process_exit(state: Arc<BridgeState<C>>) -> Self {
        Self::new(state, Arc::new(ProcessExit))
    }

    /// True once the fatal handler has been invoked.
    pub fn is_terminated(&self) -> bool {
        self.inner.lock().terminated
    }

    /// Heartbeat failures since the last successful round-trip or promotion.
    pub fn consecutive_failures(&self) -> u64 {
        self.inner.lock().consecutive_failures
    }

    /// Runs `tick` on a dedicated thread until `stop` is called.
    pub fn spawn(self: &Arc<Self>) -> Result<()> {
        let supervisor = self.clone();
        let cfg = &self.state.config;
        info!(
            "Supervisor config: endpoint={} tradingMode={} heartbeatInterval={:?} heartbeatTimeout={:?} heartbeatFailuresBeforeExit={}",
            self.state.endpoint(),
            cfg.gateway.trading_mode,
            cfg.supervisor.heartbeat_interval,
            cfg.supervisor.heartbeat_timeout,
            cfg.supervisor.heartbeat_failures_before_exit
        );
        let handle = std::thread::Builder::new()
            .name("gateway-supervisor".to_string())
            .spawn(move || supervisor.run())
            .context("Failed to spawn the supervisor thread")?;
        *self.thread.lock() = Some(handle);
        Ok(())
    }

    fn run(&self) {
        info!("Connection supervisor started.");
        loop {
            let delay = self.tick();
            let mut stopped = self.stop.stopped.lock();
            if !*stopped {
                self.stop.wake.wait_for(&mut stopped, delay);
            }
            if *stopped {
                break;
            }
        }
        info!("Connection supervisor stopped.");
    }

    /// Signals the supervisor thread to exit and joins it.
    pub fn stop(&self) {
        *self.stop.stopped.lock() = true;
        self.stop.wake.notify_all();
        if let Some(handle) = self.thread.lock().take()
            && handle.join().is_err()
        {
            error!("Supervisor thread panicked.");
        }
    }

    /// Performs one supervision step and returns the delay before the next one.
    pub fn tick(&self) -> Duration {
        let cfg = &self.state.config.supervisor;
        if self.inner.lock().terminated {
            return cfg.tick_interval;
        }

        match self.liveness() {
            Ok(true) => self.state.diagnostics.set_liveness(true),
            Ok(false) => {
                self.state.diagnostics.set_liveness(false);
                return self.reconnect();
            }
            Err(e) => {
                self.on_heartbeat_failure(&e);
                return cfg.tick_interval;
            }
        }

        let due = {
            let inner = self.inner.lock();
            inner
                .last_heartbeat
                .is_none_or(|at| at.elapsed() >= cfg.heartbeat_interval)
        };
        if due {
            self.heartbeat();
        }
        cfg.tick_interval
    }

    fn reconnect(&self) -> Duration {
        let cfg = &self.state.config.supervisor;
        if self.state.status.clear() {
            warn!("Gateway connection is not live; readiness cleared.");
        }
        match self.try_connect() {
            Ok(_) => cfg.tick_interval,
            Err(BridgeError::ConnectInProgress) => cfg.tick_interval,
            Err(e) => {
                error!("Connect failed: {e}");
                cfg.reconnect_interval
            }
        }
    }

    /// Asks the client whether its socket is live. Fails when the loop thread
    /// does not answer within `invoke_timeout`.
    fn liveness(&self) -> Result<bool, BridgeError> {
        self.state
            .bridge
            .query(|client: &mut C| client.is_connected(), self.state.config.bridge.invoke_timeout)
            .inspect_err(|e| debug!("Liveness query failed: {e}"))
    }

    /// Runs one connection attempt. Attempts are serialized; a concurrent call
    /// is rejected with `ConnectInProgress` rather than queued.
    ///
    /// Returns the new epoch on success.
    pub fn try_connect(&self) -> Result<u64, BridgeError> {
        let Some(_guard) = self.connect_guard.try_lock() else {
            return Err(BridgeError::ConnectInProgress);
        };
        let cfg = &self.state.config.supervisor;
        let endpoint = self.state.endpoint();

        self.state.status.set_connecting();
        let attempt = self.state.diagnostics.record_reconnect_attempt();
        metrics::RECONNECT_ATTEMPTS.inc();
        info!("Connecting to {endpoint} (attempt {attempt})");

        let connect_timeout = cfg.connect_timeout;
        let target = endpoint.clone();
        let connected = self.state.bridge.call(
            move |client: &mut C| Ok(client.connect(&target, connect_timeout)),
            connect_timeout,
            connect_timeout,
            None,
        );
        if let Err(e) = connected {
            self.state.status.clear();
            self.state
                .diagnostics
                .record_error(-1, format!("connect to {endpoint} failed: {e}"));
            return Err(e);
        }
        self.state.diagnostics.record_connected();

        self.state.status.set_stabilizing();
        if !cfg.stabilization_delay.is_zero() {
            std::thread::sleep(cfg.stabilization_delay);
        }
        if !matches!(self.liveness(), Ok(true)) {
            self.state.status.clear();
            self.state.diagnostics.set_liveness(false);
            warn!("Connection to {endpoint} dropped while stabilizing.");
            return Err(BridgeError::Upstream(UpstreamError::NotConnected));
        }

        let epoch = self.promote();
        self.inner.lock().last_heartbeat = Some(Instant::now());
        info!(epoch, "Connection established and synchronized. READY.");
        Ok(epoch)
    }

    fn promote(&self) -> u64 {
        let epoch = self.state.epoch.bump();
        self.state.status.mark_ready(epoch);
        self.inner.lock().consecutive_failures = 0;
        self.state.diagnostics.reset_heartbeat_failures();
        epoch
    }

    /// One end-to-end heartbeat. Absence of an error is success; the returned
    /// time itself is not inspected.
    fn heartbeat(&self) {
        let cfg = &self.state.config.supervisor;
        self.inner.lock().last_heartbeat = Some(Instant::now());

        let started = Instant::now();
        let outcome = self.state.bridge.call(
            |client: &mut C| Ok(client.request_current_time()),
            cfg.heartbeat_timeout,
            cfg.heartbeat_timeout,
            None,
        );
        debug!(
            epoch = self.state.epoch.current(),
            ready = self.state.status.is_ready(),
            duration_ms = started.elapsed().as_millis() as u64,
            ok = outcome.is_ok(),
            "heartbeat round-trip finished"
        );

        match outcome {
            Ok(_) => {
                self.inner.lock().consecutive_failures = 0;
                self.state.diagnostics.record_heartbeat_ok();
                if !self.state.status.is_ready() {
                    let epoch = self.promote();
                    info!(epoch, "Connection considered READY.");
                }
            }
            Err(e) => self.on_heartbeat_failure(&e),
        }
    }

    fn on_heartbeat_failure(&self, err: &BridgeError) {
        let threshold = self.state.config.supervisor.heartbeat_failures_before_exit;
        self.state.diagnostics.record_heartbeat_failure();
        metrics::HEARTBEAT_FAILURES.inc();
        self.state.status.clear();

        let failures = {
            let mut inner = self.inner.lock();
            if inner.terminated {
                return;
            }
            inner.consecutive_failures += 1;
            let failures = inner.consecutive_failures;
            warn!("Heartbeat failed ({failures}/{threshold}): {err}");
            if threshold == 0 || failures < u64::from(threshold) {
                return;
            }
            inner.terminated = true;
            failures
        };
        warn!("Heartbeat failure threshold reached; disconnecting.");
        if let Err(e) = self
            .state
            .bridge
            .query(|client: &mut C| client.disconnect(), DISCONNECT_TIMEOUT)
        {
            warn!("Graceful disconnect failed: {e}");
        }
        self.fatal
            .fatal(&format!("{failures} consecutive heartbeat failures"));
    }
}

/// Builds the loop-side handler for events pushed by the gateway client.
pub fn event_handler(status: Arc<ConnectionStatus>, diagnostics: Arc<Diagnostics>) -> EventHandler {
    Box::new(move |event| match event {
        GatewayEvent::Disconnected => {
            let was_ready = status.clear();
            diagnostics.record_disconnect();
            warn!(was_ready, "Gateway disconnected; readiness cleared.");
        }
        GatewayEvent::Error {
            request_id,
            code,
            message,
        } => {
            if is_informational(code) {
                debug!(request_id, code, "gateway notice: {message}");
            } else {
                warn!(request_id, code, "gateway error: {message}");
            }
            diagnostics.record_error(code, message);
        }
    })
}
