// src/core/metrics.rs

//! Defines and registers Prometheus metrics for the bridge.
//!
//! This module uses `lazy_static` so that metrics are registered only once for
//! the whole process, no matter how many `BridgeState` instances exist.

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramVec, IntCounter, TextEncoder, register_counter_vec,
    register_gauge, register_gauge_vec, register_histogram_vec, register_int_counter,
};

lazy_static! {
    // --- Connection ---
    /// 1 while the supervisor considers the gateway connection usable.
    pub static ref READY: Gauge =
        register_gauge!("gatebridge_ready", "Gateway connection readiness (1 for ready, 0 otherwise).").unwrap();
    /// The current connection epoch.
    pub static ref EPOCH: Gauge =
        register_gauge!("gatebridge_epoch", "Current connection generation.").unwrap();
    pub static ref RECONNECT_ATTEMPTS: IntCounter =
        register_int_counter!("gatebridge_reconnect_attempts_total", "Total number of connection attempts.").unwrap();
    pub static ref HEARTBEAT_FAILURES: IntCounter =
        register_int_counter!("gatebridge_heartbeat_failures_total", "Total number of failed heartbeats.").unwrap();

    // --- Admission control ---
    /// Slots currently held, labeled by lock group.
    pub static ref LOCK_INFLIGHT: GaugeVec =
        register_gauge_vec!("gatebridge_lock_inflight", "Lock slots currently held, labeled by group.", &["group"]).unwrap();
    /// Time spent waiting for a lock slot, successful or not.
    pub static ref LOCK_WAIT_SECONDS: HistogramVec =
        register_histogram_vec!("gatebridge_lock_wait_seconds", "Lock acquisition wait in seconds, labeled by group.", &["group"]).unwrap();

    // --- Cache ---
    pub static ref CACHE_HITS_TOTAL: CounterVec =
        register_counter_vec!("gatebridge_cache_hits_total", "Total number of cache hits, labeled by category.", &["category"]).unwrap();
    pub static ref CACHE_MISSES_TOTAL: CounterVec =
        register_counter_vec!("gatebridge_cache_misses_total", "Total number of cache misses, labeled by category.", &["category"]).unwrap();

    // --- Bridge ---
    /// Completed bridge waits, labeled by outcome (`ok` or a `BridgeError` code).
    pub static ref BRIDGE_CALLS: CounterVec =
        register_counter_vec!("gatebridge_bridge_calls_total", "Bridge call outcomes, labeled by outcome.", &["outcome"]).unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}
