// src/lib.rs

pub mod config;
pub mod core;
pub mod server;

// Re-export
pub use crate::core::guard::{BridgeResponse, RequestGuard};
pub use crate::core::state::BridgeState;
pub use crate::core::supervisor::{FatalHandler, ProcessExit, Supervisor};
