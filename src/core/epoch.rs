// src/core/epoch.rs

//! The connection-generation counter.
//!
//! Every transition of the supervisor into `Ready` bumps the epoch exactly once.
//! Work started under one epoch is abandoned as soon as the counter moves on,
//! so callers only ever compare values for equality.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing connection-generation stamp.
#[derive(Debug, Default)]
pub struct EpochCounter {
    current: AtomicU64,
}

impl EpochCounter {
    /// Creates a counter starting at epoch 0 (no confirmed connection yet).
    pub fn new() -> Self {
        Self {
            current: AtomicU64::new(0),
        }
    }

    /// Reads the current epoch.
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Atomically advances the epoch and returns the new value.
    pub fn bump(&self) -> u64 {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Returns true if `epoch` still names the current generation.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.current() == epoch
    }
}
