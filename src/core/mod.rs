// src/core/mod.rs

//! The central module containing the bridge engine: admission control, the
//! async bridge, connection supervision, and the shared state they operate on.

pub mod bridge;
pub mod cache;
pub mod epoch;
pub mod errors;
pub mod guard;
pub mod health;
pub mod locks;
pub mod metrics;
pub mod state;
pub mod supervisor;
pub mod upstream;

pub use errors::{BridgeError, UpstreamError};
