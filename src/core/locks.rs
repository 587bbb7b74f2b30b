// src/core/locks.rs

//! Per-category admission control in front of the gateway connection.
//!
//! Each named lock group is a counting semaphore with a fixed capacity. A request
//! takes one slot before touching the upstream and gives it back afterwards, so a
//! burst of slow historical pulls can never starve quote lookups. A request holds
//! at most one group at a time, which keeps the scheme free of lock ordering.

use crate::config::LocksConfig;
use crate::core::metrics;
use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// The group every unknown category name falls back to.
pub const DEFAULT_GROUP: &str = "default";

/// A point-in-time view of one lock group, as exposed on the health surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockSnapshot {
    pub capacity: usize,
    pub inflight: usize,
    pub last_acquire_at: Option<DateTime<Utc>>,
    pub last_acquire_ms: Option<u64>,
    pub last_hold_ms: Option<u64>,
    pub max_hold_ms: u64,
}

/// The result of an `acquire` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquisition {
    pub acquired: bool,
    pub waited: Duration,
}

impl Acquisition {
    pub fn waited_ms(&self) -> u64 {
        self.waited.as_millis() as u64
    }
}

/// Default retry policy applied by `acquire_with_policy` and `scoped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquirePolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: Duration,
}

#[derive(Debug, Default)]
struct GroupState {
    inflight: usize,
    last_acquire_at: Option<DateTime<Utc>>,
    last_acquire_ms: Option<u64>,
    last_hold_ms: Option<u64>,
    max_hold_ms: u64,
}

/// A named, capacity-bounded admission gate.
#[derive(Debug)]
pub struct LockGroup {
    name: String,
    capacity: usize,
    state: Mutex<GroupState>,
    available: Condvar,
}

impl LockGroup {
    /// Creates a group; a capacity of zero is clamped to one.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            state: Mutex::new(GroupState::default()),
            available: Condvar::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn inflight(&self) -> usize {
        self.state.lock().inflight
    }

    /// Blocks up to `timeout` for a free slot and takes it.
    fn take_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.inflight >= self.capacity {
            if self.available.wait_until(&mut state, deadline).timed_out() {
                if state.inflight >= self.capacity {
                    return false;
                }
                break;
            }
        }
        state.inflight += 1;
        metrics::LOCK_INFLIGHT
            .with_label_values(&[self.name.as_str()])
            .set(state.inflight as f64);
        true
    }

    fn record_acquire(&self, waited: Duration) {
        let mut state = self.state.lock();
        state.last_acquire_at = Some(Utc::now());
        state.last_acquire_ms = Some(waited.as_millis() as u64);
    }

    /// Returns a slot. Releasing with nothing in flight is a no-op.
    fn give_back(&self, hold: Duration) -> bool {
        let hold_ms = hold.as_millis() as u64;
        {
            let mut state = self.state.lock();
            if state.inflight == 0 {
                return false;
            }
            state.inflight -= 1;
            state.last_hold_ms = Some(hold_ms);
            state.max_hold_ms = state.max_hold_ms.max(hold_ms);
            metrics::LOCK_INFLIGHT
                .with_label_values(&[self.name.as_str()])
                .set(state.inflight as f64);
        }
        self.available.notify_one();
        true
    }

    pub fn snapshot(&self) -> LockSnapshot {
        let state = self.state.lock();
        LockSnapshot {
            capacity: self.capacity,
            inflight: state.inflight,
            last_acquire_at: state.last_acquire_at,
            last_acquire_ms: state.last_acquire_ms,
            last_hold_ms: state.last_hold_ms,
            max_hold_ms: state.max_hold_ms,
        }
    }
}

/// The set of lock groups, created once at startup.
#[derive(Debug)]
pub struct LockRegistry {
    groups: HashMap<String, LockGroup>,
    policy: AcquirePolicy,
    warn_threshold: Duration,
}

impl LockRegistry {
    /// Builds a registry from `(name, capacity)` pairs. A `default` group is
    /// always present; if absent from `capacities` it gets `default_capacity`.
    pub fn new(
        capacities: impl IntoIterator<Item = (String, usize)>,
        default_capacity: usize,
        policy: AcquirePolicy,
        warn_threshold: Duration,
    ) -> Self {
        let mut groups: HashMap<String, LockGroup> = capacities
            .into_iter()
            .map(|(name, capacity)| (name.clone(), LockGroup::new(name, capacity)))
            .collect();
        groups
            .entry(DEFAULT_GROUP.to_string())
            .or_insert_with(|| LockGroup::new(DEFAULT_GROUP, default_capacity));

        Self {
            groups,
            policy,
            warn_threshold,
        }
    }

    pub fn from_config(config: &LocksConfig) -> Self {
        Self::new(
            config.capacities.clone(),
            config.default_capacity,
            AcquirePolicy {
                timeout: config.acquire_timeout,
                max_attempts: config.retry_attempts,
                backoff: config.retry_backoff,
            },
            config.warn_threshold,
        )
    }

    /// Looks up a group, falling back to `default` for unknown names.
    pub fn group(&self, name: &str) -> &LockGroup {
        self.groups
            .get(name)
            .or_else(|| self.groups.get(DEFAULT_GROUP))
            .expect("default lock group is always registered")
    }

    pub fn policy(&self) -> AcquirePolicy {
        self.policy
    }

    pub fn warn_threshold(&self) -> Duration {
        self.warn_threshold
    }

    /// Tries to take a slot in `group`, retrying up to `max_attempts` times with
    /// `backoff` between attempts, never waiting past `timeout` overall.
    ///
    /// Each attempt waits for at most an even share of the time left, so the
    /// last attempt gets whatever the earlier ones and their backoff did not use.
    pub fn acquire(
        &self,
        group: &str,
        timeout: Duration,
        max_attempts: u32,
        backoff: Duration,
    ) -> Acquisition {
        let lock = self.group(group);
        let start = Instant::now();
        let deadline = start + timeout;
        let attempts = max_attempts.max(1);
        let mut acquired = false;

        for attempt in 0..attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let slice = remaining / (attempts - attempt);
            if lock.take_for(slice) {
                acquired = true;
                break;
            }
            if attempt + 1 < attempts && !backoff.is_zero() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                std::thread::sleep(backoff.min(remaining));
            }
        }

        let waited = start.elapsed();
        metrics::LOCK_WAIT_SECONDS
            .with_label_values(&[lock.name()])
            .observe(waited.as_secs_f64());
        if acquired {
            lock.record_acquire(waited);
        } else {
            debug!(group = lock.name(), waited_ms = waited.as_millis() as u64, "lock acquire exhausted");
        }
        Acquisition { acquired, waited }
    }

    /// `acquire` using the registry's configured attempts and backoff.
    pub fn acquire_with_policy(&self, group: &str, timeout: Duration) -> Acquisition {
        self.acquire(group, timeout, self.policy.max_attempts, self.policy.backoff)
    }

    /// Returns a slot to `group` and records how long it was held.
    ///
    /// Returns false when nothing was in flight (a repeated release).
    pub fn release(&self, group: &str, hold: Duration) -> bool {
        let lock = self.group(group);
        let released = lock.give_back(hold);
        if released && hold >= self.warn_threshold {
            warn!(
                group = lock.name(),
                hold_ms = hold.as_millis() as u64,
                "long lock hold"
            );
        }
        released
    }

    /// Takes a slot without any readiness gating; the permit releases on drop.
    pub fn scoped(&self, group: &str, timeout: Duration) -> Option<LockPermit<'_>> {
        let acquisition = self.acquire_with_policy(group, timeout);
        acquisition.acquired.then(|| LockPermit {
            registry: self,
            group: self.group(group).name().to_string(),
            acquired_at: Instant::now(),
            waited: acquisition.waited,
        })
    }

    pub fn snapshot(&self) -> BTreeMap<String, LockSnapshot> {
        self.groups
            .iter()
            .map(|(name, group)| (name.clone(), group.snapshot()))
            .collect()
    }
}

/// An RAII slot in a lock group.
#[derive(Debug)]
pub struct LockPermit<'a> {
    registry: &'a LockRegistry,
    group: String,
    acquired_at: Instant,
    waited: Duration,
}

impl LockPermit<'_> {
    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn waited(&self) -> Duration {
        self.waited
    }
}

impl Drop for LockPermit<'_> {
    fn drop(&mut self) {
        self.registry
            .release(&self.group, self.acquired_at.elapsed());
    }
}
