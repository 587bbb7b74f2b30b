// src/core/upstream/simulated.rs

//! An in-process gateway used by the bundled binary and the test-suite.
//!
//! `SimulatedGateway` behaves like a real client from the bridge's point of view
//! (it lives on the loop thread, its futures run on the loop, it pushes events),
//! while `SimulatorControl` is a thread-safe remote control for injecting the
//! failures the supervisor must survive.

use super::{GatewayClient, GatewayEndpoint, GatewayEvent};
use crate::core::errors::UpstreamError;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// How the simulated gateway answers heartbeat round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeartbeatMode {
    #[default]
    Answer,
    /// Reply with a gateway error.
    Fail,
    /// Never reply; the caller's timeout has to fire.
    Stall,
}

#[derive(Debug)]
struct ControlInner {
    connected: AtomicBool,
    refuse_connects: AtomicBool,
    heartbeat_mode: Mutex<HeartbeatMode>,
    connect_latency: Mutex<Duration>,
    request_latency: Mutex<Duration>,
    latency_jitter: Mutex<Duration>,
    connect_attempts: AtomicU64,
    heartbeats: AtomicU64,
    disconnects: AtomicU64,
    last_endpoint: Mutex<Option<GatewayEndpoint>>,
    events_tx: mpsc::UnboundedSender<GatewayEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<GatewayEvent>>>,
}

/// A cloneable handle for steering a `SimulatedGateway` from any thread.
#[derive(Debug, Clone)]
pub struct SimulatorControl {
    inner: Arc<ControlInner>,
}

impl Default for SimulatorControl {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatorControl {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(ControlInner {
                connected: AtomicBool::new(false),
                refuse_connects: AtomicBool::new(false),
                heartbeat_mode: Mutex::new(HeartbeatMode::Answer),
                connect_latency: Mutex::new(Duration::from_millis(5)),
                request_latency: Mutex::new(Duration::from_millis(1)),
                latency_jitter: Mutex::new(Duration::ZERO),
                connect_attempts: AtomicU64::new(0),
                heartbeats: AtomicU64::new(0),
                disconnects: AtomicU64::new(0),
                last_endpoint: Mutex::new(None),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
            }),
        }
    }

    /// Builds a gateway driven by this control. Call it from the loop factory.
    pub fn gateway(&self) -> SimulatedGateway {
        SimulatedGateway {
            control: self.clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn set_refuse_connects(&self, refuse: bool) {
        self.inner.refuse_connects.store(refuse, Ordering::SeqCst);
    }

    pub fn set_heartbeat_mode(&self, mode: HeartbeatMode) {
        *self.inner.heartbeat_mode.lock() = mode;
    }

    pub fn set_connect_latency(&self, latency: Duration) {
        *self.inner.connect_latency.lock() = latency;
    }

    pub fn set_request_latency(&self, latency: Duration) {
        *self.inner.request_latency.lock() = latency;
    }

    /// Adds up to `jitter` of random delay on top of every simulated latency.
    pub fn set_latency_jitter(&self, jitter: Duration) {
        *self.inner.latency_jitter.lock() = jitter;
    }

    /// Drops the session and pushes a `Disconnected` event, like a gateway restart.
    pub fn drop_connection(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        let _ = self.inner.events_tx.send(GatewayEvent::Disconnected);
    }

    /// Drops the session without telling anyone; only the liveness query notices.
    pub fn drop_connection_silently(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
    }

    pub fn emit_error(&self, code: i32, message: impl Into<String>) {
        let _ = self.inner.events_tx.send(GatewayEvent::Error {
            request_id: -1,
            code,
            message: message.into(),
        });
    }

    pub fn connect_attempts(&self) -> u64 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn heartbeats(&self) -> u64 {
        self.inner.heartbeats.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u64 {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    pub fn last_endpoint(&self) -> Option<GatewayEndpoint> {
        self.inner.last_endpoint.lock().clone()
    }

    fn with_jitter(&self, base: Duration) -> Duration {
        let jitter = *self.inner.latency_jitter.lock();
        if jitter.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter.as_millis() as u64);
        base + Duration::from_millis(extra)
    }
}

/// The simulated client. Construct it on the loop thread via `SimulatorControl::gateway`.
#[derive(Debug)]
pub struct SimulatedGateway {
    control: SimulatorControl,
}

impl SimulatedGateway {
    pub fn control(&self) -> &SimulatorControl {
        &self.control
    }

    /// A generic request: resolves to `value` after `delay`, failing if the
    /// session is gone at either end of the delay.
    pub fn echo<T: 'static>(
        &mut self,
        value: T,
        delay: Duration,
    ) -> LocalBoxFuture<'static, Result<T, UpstreamError>> {
        let control = self.control.clone();
        let delay = control.with_jitter(delay);
        async move {
            if !control.is_connected() {
                return Err(UpstreamError::NotConnected);
            }
            tokio::time::sleep(delay).await;
            if !control.is_connected() {
                return Err(UpstreamError::NotConnected);
            }
            Ok(value)
        }
        .boxed_local()
    }

    /// A request that fails with a gateway error after `delay`.
    pub fn reject<T: 'static>(
        &mut self,
        code: i32,
        message: &str,
        delay: Duration,
    ) -> LocalBoxFuture<'static, Result<T, UpstreamError>> {
        let message = message.to_string();
        async move {
            tokio::time::sleep(delay).await;
            Err(UpstreamError::Gateway { code, message })
        }
        .boxed_local()
    }
}

impl GatewayClient for SimulatedGateway {
    fn connect(
        &mut self,
        endpoint: &GatewayEndpoint,
        timeout: Duration,
    ) -> LocalBoxFuture<'static, Result<(), UpstreamError>> {
        let control = self.control.clone();
        let endpoint = endpoint.clone();
        async move {
            control.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);
            *control.inner.last_endpoint.lock() = Some(endpoint.clone());
            let latency = control.with_jitter(*control.inner.connect_latency.lock());
            if latency > timeout {
                tokio::time::sleep(timeout).await;
                return Err(UpstreamError::TimedOut(timeout));
            }
            tokio::time::sleep(latency).await;
            if control.inner.refuse_connects.load(Ordering::SeqCst) {
                return Err(UpstreamError::ConnectFailed(format!(
                    "connection refused by {endpoint}"
                )));
            }
            control.inner.connected.store(true, Ordering::SeqCst);
            debug!("simulated gateway connected to {endpoint}");
            Ok(())
        }
        .boxed_local()
    }

    fn is_connected(&self) -> bool {
        self.control.is_connected()
    }

    fn request_current_time(&mut self) -> LocalBoxFuture<'static, Result<DateTime<Utc>, UpstreamError>> {
        let control = self.control.clone();
        async move {
            control.inner.heartbeats.fetch_add(1, Ordering::SeqCst);
            if !control.is_connected() {
                return Err(UpstreamError::NotConnected);
            }
            let mode = *control.inner.heartbeat_mode.lock();
            let latency = control.with_jitter(*control.inner.request_latency.lock());
            match mode {
                HeartbeatMode::Answer => {
                    tokio::time::sleep(latency).await;
                    Ok(Utc::now())
                }
                HeartbeatMode::Fail => {
                    tokio::time::sleep(latency).await;
                    Err(UpstreamError::Gateway {
                        code: 1100,
                        message: "connectivity between gateway and server is lost".into(),
                    })
                }
                HeartbeatMode::Stall => futures::future::pending().await,
            }
        }
        .boxed_local()
    }

    fn disconnect(&mut self) {
        self.control.inner.disconnects.fetch_add(1, Ordering::SeqCst);
        self.control.drop_connection();
    }

    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<GatewayEvent>> {
        self.control.inner.events_rx.lock().take()
    }
}
