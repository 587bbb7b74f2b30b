// src/core/state/readiness.rs

//! The process-wide connection state and its readiness gate.
//!
//! Only the supervisor (and the disconnect event it installs) mutate this; every
//! request path reads it, usually through `wait_until_ready`.

use crate::core::metrics;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    /// The socket is up; waiting out the settle delay before confirming.
    Stabilizing,
    Ready,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Stabilizing => "stabilizing",
            ConnectionState::Ready => "ready",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct StatusInner {
    state: ConnectionState,
    ready_since_epoch: Option<u64>,
}

/// The connection state plus a condition variable that wakes readiness waiters.
#[derive(Debug, Default)]
pub struct ConnectionStatus {
    inner: Mutex<StatusInner>,
    ready: Condvar,
}

impl ConnectionStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// The epoch recorded at the most recent promotion to `Ready`.
    pub fn ready_since_epoch(&self) -> Option<u64> {
        self.inner.lock().ready_since_epoch
    }

    /// Blocks up to `timeout` for the state to become `Ready`.
    pub fn wait_until_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.state != ConnectionState::Ready {
            if self.ready.wait_until(&mut inner, deadline).timed_out() {
                return inner.state == ConnectionState::Ready;
            }
        }
        true
    }

    pub fn set_connecting(&self) {
        self.set(ConnectionState::Connecting);
    }

    pub fn set_stabilizing(&self) {
        self.set(ConnectionState::Stabilizing);
    }

    /// Promotes to `Ready` under `epoch` and wakes every waiter.
    pub fn mark_ready(&self, epoch: u64) {
        {
            let mut inner = self.inner.lock();
            inner.state = ConnectionState::Ready;
            inner.ready_since_epoch = Some(epoch);
        }
        metrics::READY.set(1.0);
        metrics::EPOCH.set(epoch as f64);
        self.ready.notify_all();
    }

    /// Drops readiness. Returns true if the state was `Ready` before.
    pub fn clear(&self) -> bool {
        let was_ready = {
            let mut inner = self.inner.lock();
            let was_ready = inner.state == ConnectionState::Ready;
            inner.state = ConnectionState::Disconnected;
            was_ready
        };
        metrics::READY.set(0.0);
        was_ready
    }

    fn set(&self, state: ConnectionState) {
        self.inner.lock().state = state;
        metrics::READY.set(0.0);
    }
}
