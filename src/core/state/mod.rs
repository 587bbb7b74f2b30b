// src/core/state/mod.rs

//! Defines the central `BridgeState` struct and the shared state components it owns.

mod core;
mod diagnostics;
mod readiness;

pub use core::BridgeState;
pub use diagnostics::{Diagnostics, DiagnosticsSnapshot, LastError};
pub use readiness::{ConnectionState, ConnectionStatus};
