// src/core/upstream/mod.rs

//! The boundary to the external gateway client.
//!
//! The client library owns the wire protocol and the domain objects. The bridge
//! only needs a handful of capabilities from it: connect, a liveness query, one
//! cheap round-trip for heartbeats, a disconnect, and a push channel for
//! disconnect and error events. The client lives on the loop thread for its whole
//! life, so implementations do not have to be `Send`.

pub mod simulated;

use crate::core::errors::UpstreamError;
use chrono::{DateTime, Utc};
use futures::future::LocalBoxFuture;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;

pub use simulated::{SimulatedGateway, SimulatorControl};

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEndpoint {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
}

impl fmt::Display for GatewayEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (clientId={})", self.host, self.port, self.client_id)
    }
}

/// Events pushed by the client outside of any request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// The client noticed the connection went away.
    Disconnected,
    /// An error or status notice; `request_id` is `-1` for connection-level notices.
    Error {
        request_id: i64,
        code: i32,
        message: String,
    },
}

/// Status codes the gateway emits for routine farm-connectivity notices.
pub const INFORMATIONAL_CODES: [i32; 3] = [2104, 2106, 2158];

/// Returns true for error-event codes that are status notices rather than failures.
pub fn is_informational(code: i32) -> bool {
    INFORMATIONAL_CODES.contains(&code)
}

/// The capabilities the bridge consumes from a gateway client.
///
/// Asynchronous methods return futures that do not borrow the client, so the
/// bridge can schedule them on the loop and hand a completion back to the caller.
pub trait GatewayClient: 'static {
    /// Opens the connection; resolves once the session is established.
    fn connect(
        &mut self,
        endpoint: &GatewayEndpoint,
        timeout: Duration,
    ) -> LocalBoxFuture<'static, Result<(), UpstreamError>>;

    /// Whether the client currently believes its socket is live.
    fn is_connected(&self) -> bool;

    /// A lightweight end-to-end round-trip used as a heartbeat.
    fn request_current_time(&mut self) -> LocalBoxFuture<'static, Result<DateTime<Utc>, UpstreamError>>;

    /// Closes the connection. Must not block.
    fn disconnect(&mut self);

    /// Hands out the event channel. Called once by the loop thread at startup.
    fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<GatewayEvent>>;
}
