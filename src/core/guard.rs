// src/core/guard.rs

//! Defines `RequestGuard`, the per-request entry point for routing layers.
//!
//! A guard admits one logical request: it waits (bounded) for readiness, takes a
//! slot in the request's lock group, and pins the connection epoch observed at
//! admission. Calls made through the guard are abandoned if that epoch is
//! superseded. Dropping the guard returns the slot and logs the request timings.

use crate::core::bridge::UpstreamFuture;
use crate::core::cache::CachedValue;
use crate::core::errors::{BridgeError, UpstreamError};
use crate::core::state::BridgeState;
use crate::core::upstream::GatewayClient;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// A structured response produced by the guard helpers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeResponse {
    pub status: u16,
    pub body: Value,
}

impl IntoResponse for BridgeResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body)).into_response()
    }
}

/// Where a `fetch_cached` payload came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadSource {
    /// A cache entry within its TTL.
    Cache,
    /// A fresh upstream reply, now written back to the cache.
    Upstream,
    /// An expired cache entry served because the upstream was unavailable.
    Stale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched {
    pub payload: Value,
    pub source: PayloadSource,
    pub age: Duration,
}

impl Fetched {
    fn from_cache(value: CachedValue<Value>, source: PayloadSource) -> Self {
        Self {
            payload: value.payload,
            source,
            age: value.age,
        }
    }
}

/// Returns a fresh correlation id: the first 8 hex digits of a v4 UUID.
pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Admission, bridge access and request-scoped logging for one request.
pub struct RequestGuard<'a, C: GatewayClient> {
    state: &'a BridgeState<C>,
    name: String,
    group: String,
    request_id: String,
    started: Instant,
    ready_wait: Duration,
    lock_wait: Option<Duration>,
    lock_acquired_at: Option<Instant>,
    epoch: Option<u64>,
    rejection: Option<BridgeError>,
    status: Option<u16>,
}

impl<'a, C: GatewayClient> RequestGuard<'a, C> {
    /// Admits a request named `name` into lock group `group`, waiting up to
    /// `timeout` for readiness and again up to `timeout` for a lock slot.
    ///
    /// The guard is returned either way; check `is_admitted` or
    /// `rejection_response` before touching the upstream.
    pub fn enter(state: &'a BridgeState<C>, name: &str, group: &str, timeout: Duration) -> Self {
        let request_id = new_request_id();
        let group = state.locks.group(group).name().to_string();
        state.diagnostics.record_request(&request_id, name);
        info!(req = %request_id, group = %group, "{name} start");

        let mut guard = Self {
            state,
            name: name.to_string(),
            group,
            request_id,
            started: Instant::now(),
            ready_wait: Duration::ZERO,
            lock_wait: None,
            lock_acquired_at: None,
            epoch: None,
            rejection: None,
            status: None,
        };

        let ready_start = Instant::now();
        let ready = state.status.wait_until_ready(timeout);
        guard.ready_wait = ready_start.elapsed();
        if !ready {
            warn!(
                req = %guard.request_id,
                wait_ms = guard.ready_wait.as_millis() as u64,
                state = %state.status.state(),
                "{name} not ready"
            );
            guard.rejection = Some(BridgeError::NotReady {
                waited_ms: guard.ready_wait.as_millis() as u64,
            });
            return guard;
        }

        let acquisition = state.locks.acquire_with_policy(&guard.group, timeout);
        guard.lock_wait = Some(acquisition.waited);
        if !acquisition.acquired {
            warn!(
                req = %guard.request_id,
                group = %guard.group,
                wait_ms = acquisition.waited_ms(),
                ready_ms = guard.ready_wait.as_millis() as u64,
                "{name} lock timeout"
            );
            guard.rejection = Some(BridgeError::Saturated {
                group: guard.group.clone(),
                waited_ms: acquisition.waited_ms(),
            });
            return guard;
        }

        guard.lock_acquired_at = Some(Instant::now());
        guard.epoch = Some(state.epoch.current());
        info!(
            req = %guard.request_id,
            group = %guard.group,
            wait_ms = acquisition.waited_ms(),
            ready_ms = guard.ready_wait.as_millis() as u64,
            "{name} lock acquired"
        );
        guard
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn is_admitted(&self) -> bool {
        self.rejection.is_none()
    }

    pub fn rejection(&self) -> Option<&BridgeError> {
        self.rejection.as_ref()
    }

    /// The epoch pinned at admission, if admitted.
    pub fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    pub fn ready_wait(&self) -> Duration {
        self.ready_wait
    }

    pub fn lock_wait(&self) -> Option<Duration> {
        self.lock_wait
    }

    /// The 503 response for a rejected request, `None` if admitted.
    pub fn rejection_response(&mut self) -> Option<BridgeResponse> {
        let reason = self.rejection.as_ref()?.code();
        self.status = Some(503);
        Some(BridgeResponse {
            status: 503,
            body: json!({ "error": "Bridge busy", "reason": reason }),
        })
    }

    /// Calls the gateway through the bridge, pinned to the admission epoch.
    pub fn call<T, F>(&self, start_call: F, timeout: Duration) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<UpstreamFuture<T>, UpstreamError> + Send + 'static,
    {
        if let Some(rejection) = &self.rejection {
            return Err(rejection.clone());
        }
        let invoke_timeout = self.state.config.bridge.invoke_timeout.min(timeout);
        let result = self
            .state
            .bridge
            .call(start_call, invoke_timeout, timeout, self.epoch);
        if let Err(e) = &result {
            warn!(req = %self.request_id, code = e.code(), "{} bridge call failed: {e}", self.name);
        }
        result
    }

    /// Serves `category`/`key` from the cache when fresh; otherwise fetches it
    /// through the bridge and writes the reply back. When the request was
    /// rejected or the fetch fails, an expired entry is served if one exists.
    pub fn fetch_cached<F>(&self, category: &str, key: &str, start_call: F, timeout: Duration) -> Result<Fetched, BridgeError>
    where
        F: FnOnce(&mut C) -> Result<UpstreamFuture<Value>, UpstreamError> + Send + 'static,
    {
        let cache = &self.state.cache;
        if let Some(hit) = cache.read(category, key) {
            return Ok(Fetched::from_cache(hit, PayloadSource::Cache));
        }

        match self.call(start_call, timeout) {
            Ok(payload) => {
                cache.write(category, key, payload.clone());
                Ok(Fetched {
                    payload,
                    source: PayloadSource::Upstream,
                    age: Duration::ZERO,
                })
            }
            Err(e) => match cache.read_any(category, key) {
                Some(stale) => {
                    warn!(
                        req = %self.request_id,
                        category,
                        age_ms = stale.age.as_millis() as u64,
                        "{} serving stale cache after {}",
                        self.name,
                        e.code()
                    );
                    Ok(Fetched::from_cache(stale, PayloadSource::Stale))
                }
                None => Err(e),
            },
        }
    }

    /// A success response with `payload`.
    pub fn respond(&mut self, payload: Value, status: u16) -> BridgeResponse {
        self.status = Some(status);
        BridgeResponse {
            status,
            body: payload,
        }
    }

    /// An error response `{"error": message, ...extra}`.
    pub fn error(&mut self, status: u16, message: &str, extra: Option<Value>) -> BridgeResponse {
        self.status = Some(status);
        let mut body = json!({ "error": message });
        if let (Some(Value::Object(extra)), Value::Object(map)) = (extra, &mut body) {
            map.extend(extra);
        }
        BridgeResponse { status, body }
    }

    /// An error response derived from a bridge failure.
    pub fn error_from(&mut self, err: &BridgeError) -> BridgeResponse {
        let message = err.to_string();
        self.error(err.status_code(), &message, Some(json!({ "reason": err.code() })))
    }
}

impl<C: GatewayClient> Drop for RequestGuard<'_, C> {
    fn drop(&mut self) {
        let mut hold_ms = None;
        if let Some(acquired_at) = self.lock_acquired_at.take() {
            let hold = acquired_at.elapsed();
            hold_ms = Some(hold.as_millis() as u64);
            // The registry logs holds above its warning threshold.
            self.state.locks.release(&self.group, hold);
        }

        let status = self
            .status
            .unwrap_or(if self.rejection.is_some() { 503 } else { 200 });
        if std::thread::panicking() {
            error!(req = %self.request_id, "{} exception", self.name);
        }
        info!(
            req = %self.request_id,
            status,
            duration_ms = self.started.elapsed().as_millis() as u64,
            ready_ms = self.ready_wait.as_millis() as u64,
            lock_wait_ms = self.lock_wait.map(|w| w.as_millis() as u64),
            lock_hold_ms = hold_ms,
            "{} done",
            self.name
        );
    }
}
