// src/core/errors.rs

//! Defines the error types surfaced by the bridge.
//!
//! `UpstreamError` describes failures reported by the gateway client itself.
//! `BridgeError` is the taxonomy every request path sees: it keeps "not ready"
//! and "saturated" apart from genuine upstream failures so callers can decide
//! between backing off, retrying, or reporting a data error.

use std::time::Duration;
use thiserror::Error;

/// A failure reported by the gateway client collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("not connected to gateway")]
    NotConnected,

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    #[error("gateway request timed out after {0:?}")]
    TimedOut(Duration),

    /// An error event or error reply carrying the gateway's numeric code.
    #[error("gateway error {code}: {message}")]
    Gateway { code: i32, message: String },

    #[error("{0}")]
    Other(String),
}

/// The outcome of a failed admission, bridge call, or connection attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The supervisor has not confirmed a usable connection within the wait bound.
    #[error("gateway connection not ready (waited {waited_ms}ms)")]
    NotReady { waited_ms: u64 },

    /// No slot in the lock group became available before the acquire deadline.
    #[error("lock group '{group}' saturated (waited {waited_ms}ms)")]
    Saturated { group: String, waited_ms: u64 },

    /// The loop thread is not running yet, or has already stopped.
    #[error("no-loop")]
    NoLoop,

    /// The scheduled closure did not start on the loop thread in time.
    #[error("invoke-timeout after {0:?}")]
    InvokeTimeout(Duration),

    /// The scheduled closure failed synchronously on the loop thread.
    #[error("invoke-error: {0}")]
    InvokeError(UpstreamError),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The pending call was dropped on the loop side before producing a result.
    #[error("cancelled")]
    Cancelled,

    /// A reconnect advanced the epoch while the call was in flight.
    #[error("connection-reset (expected epoch {expected}, current {current})")]
    ConnectionReset { expected: u64, current: u64 },

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    /// Another connection attempt already holds the connect guard.
    #[error("connection attempt already in progress")]
    ConnectInProgress,
}

impl BridgeError {
    /// A short, stable tag suitable for response bodies and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            BridgeError::NotReady { .. } => "not-ready",
            BridgeError::Saturated { .. } => "lock-timeout",
            BridgeError::NoLoop => "no-loop",
            BridgeError::InvokeTimeout(_) => "invoke-timeout",
            BridgeError::InvokeError(_) => "invoke-error",
            BridgeError::Timeout(_) => "timeout",
            BridgeError::Cancelled => "cancelled",
            BridgeError::ConnectionReset { .. } => "connection-reset",
            BridgeError::Upstream(_) => "upstream-error",
            BridgeError::ConnectInProgress => "connect-in-progress",
        }
    }

    /// Whether repeating the same request later may succeed without any change
    /// on the caller's side.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, BridgeError::InvokeError(_))
    }

    /// Whether the failure means "the bridge is busy or not ready" rather than
    /// "the upstream call failed".
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            BridgeError::NotReady { .. }
                | BridgeError::Saturated { .. }
                | BridgeError::NoLoop
                | BridgeError::ConnectInProgress
        )
    }

    /// The HTTP status an outer routing layer should use for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            BridgeError::NotReady { .. }
            | BridgeError::Saturated { .. }
            | BridgeError::NoLoop
            | BridgeError::ConnectInProgress
            | BridgeError::ConnectionReset { .. }
            | BridgeError::Cancelled => 503,
            BridgeError::InvokeTimeout(_) | BridgeError::Timeout(_) => 504,
            BridgeError::InvokeError(_) | BridgeError::Upstream(_) => 502,
        }
    }
}
