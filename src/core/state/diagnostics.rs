// src/core/state/diagnostics.rs

//! Rolling counters and timestamps read by the health surface.
//!
//! Nothing on a request path depends on these values; they exist for operators.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastError {
    pub code: i32,
    pub message: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Timestamps {
    last_error: Option<LastError>,
    last_connect_at: Option<DateTime<Utc>>,
    last_disconnect_at: Option<DateTime<Utc>>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    last_heartbeat_ok_at: Option<DateTime<Utc>>,
    last_request_id: Option<String>,
    last_request_name: Option<String>,
}

/// Write-mostly diagnostic counters.
#[derive(Debug, Default)]
pub struct Diagnostics {
    reconnect_attempts: AtomicU64,
    heartbeat_failures: AtomicU64,
    consecutive_heartbeat_failures: AtomicU64,
    last_liveness: AtomicBool,
    timestamps: Mutex<Timestamps>,
}

/// A serializable copy of `Diagnostics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsSnapshot {
    pub reconnect_attempts: u64,
    pub heartbeat_failures: u64,
    pub consecutive_heartbeat_failures: u64,
    pub connected: bool,
    pub last_error: Option<LastError>,
    pub last_connect_at: Option<DateTime<Utc>>,
    pub last_disconnect_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_heartbeat_ok_at: Option<DateTime<Utc>>,
    pub last_request_id: Option<String>,
    pub last_request_name: Option<String>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_reconnect_attempt(&self) -> u64 {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    pub fn record_connected(&self) {
        self.last_liveness.store(true, Ordering::Relaxed);
        self.timestamps.lock().last_connect_at = Some(Utc::now());
    }

    pub fn record_disconnect(&self) {
        self.last_liveness.store(false, Ordering::Relaxed);
        self.timestamps.lock().last_disconnect_at = Some(Utc::now());
    }

    /// The most recent liveness value observed by the supervisor.
    pub fn set_liveness(&self, connected: bool) {
        self.last_liveness.store(connected, Ordering::Relaxed);
    }

    pub fn last_liveness(&self) -> bool {
        self.last_liveness.load(Ordering::Relaxed)
    }

    pub fn record_heartbeat_ok(&self) {
        self.consecutive_heartbeat_failures.store(0, Ordering::Relaxed);
        let now = Utc::now();
        let mut ts = self.timestamps.lock();
        ts.last_heartbeat_at = Some(now);
        ts.last_heartbeat_ok_at = Some(now);
    }

    /// Returns the number of consecutive failures including this one.
    pub fn record_heartbeat_failure(&self) -> u64 {
        self.heartbeat_failures.fetch_add(1, Ordering::Relaxed);
        self.timestamps.lock().last_heartbeat_at = Some(Utc::now());
        self.consecutive_heartbeat_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_heartbeat_failures(&self) {
        self.consecutive_heartbeat_failures.store(0, Ordering::Relaxed);
    }

    pub fn consecutive_heartbeat_failures(&self) -> u64 {
        self.consecutive_heartbeat_failures.load(Ordering::Relaxed)
    }

    pub fn heartbeat_failures(&self) -> u64 {
        self.heartbeat_failures.load(Ordering::Relaxed)
    }

    pub fn record_error(&self, code: i32, message: impl Into<String>) {
        self.timestamps.lock().last_error = Some(LastError {
            code,
            message: message.into(),
            at: Utc::now(),
        });
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.timestamps.lock().last_error.clone()
    }

    pub fn record_request(&self, id: &str, name: &str) {
        let mut ts = self.timestamps.lock();
        ts.last_request_id = Some(id.to_string());
        ts.last_request_name = Some(name.to_string());
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let ts = self.timestamps.lock();
        DiagnosticsSnapshot {
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            heartbeat_failures: self.heartbeat_failures.load(Ordering::Relaxed),
            consecutive_heartbeat_failures: self.consecutive_heartbeat_failures.load(Ordering::Relaxed),
            connected: self.last_liveness.load(Ordering::Relaxed),
            last_error: ts.last_error.clone(),
            last_connect_at: ts.last_connect_at,
            last_disconnect_at: ts.last_disconnect_at,
            last_heartbeat_at: ts.last_heartbeat_at,
            last_heartbeat_ok_at: ts.last_heartbeat_ok_at,
            last_request_id: ts.last_request_id.clone(),
            last_request_name: ts.last_request_name.clone(),
        }
    }
}
