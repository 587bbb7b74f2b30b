// src/core/bridge/call.rs

//! The caller-side half of a scheduled gateway call, plus loop bookkeeping.

use crate::core::errors::UpstreamError;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};
use tokio::task::AbortHandle;

/// A pending call whose future is running on the loop thread.
///
/// Owned exclusively by the submitting caller. The loop side writes the result
/// at most once; dropping or cancelling the handle discards it.
#[derive(Debug)]
pub struct CallHandle<T> {
    pub(super) result_rx: Receiver<Result<T, UpstreamError>>,
    pub(super) abort: AbortHandle,
    pub(super) submitted_at: Instant,
}

impl<T> CallHandle<T> {
    /// Stops the loop-side task. Cancellation is cooperative: an upstream
    /// request already on the wire may still complete, its reply is discarded.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    pub fn elapsed(&self) -> Duration {
        self.submitted_at.elapsed()
    }
}

/// Counters maintained by the loop thread.
#[derive(Debug, Default)]
pub struct LoopStats {
    pub(super) running: AtomicBool,
    pub(super) jobs_executed: AtomicU64,
    pub(super) pending_calls: AtomicU64,
}

impl LoopStats {
    pub fn snapshot(&self) -> LoopStatsSnapshot {
        LoopStatsSnapshot {
            running: self.running.load(Ordering::Relaxed),
            jobs_executed: self.jobs_executed.load(Ordering::Relaxed),
            pending_calls: self.pending_calls.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopStatsSnapshot {
    pub running: bool,
    pub jobs_executed: u64,
    pub pending_calls: u64,
}

/// Keeps `pending_calls` accurate even when a task is aborted mid-flight.
pub(super) struct PendingGuard(Arc<LoopStats>);

impl PendingGuard {
    pub(super) fn enter(stats: Arc<LoopStats>) -> Self {
        stats.pending_calls.fetch_add(1, Ordering::Relaxed);
        Self(stats)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.0.pending_calls.fetch_sub(1, Ordering::Relaxed);
    }
}
