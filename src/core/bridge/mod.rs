// src/core/bridge/mod.rs

//! The synchronous/asynchronous bridge.
//!
//! The gateway client is single-thread affine: it is created on, and only ever
//! touched from, one dedicated `gateway-loop` thread that runs a current-thread
//! Tokio runtime inside a `LocalSet`. Every other thread talks to it through two
//! primitives:
//!
//! - `submit` ships a closure to the loop. The closure starts an upstream request
//!   and returns its future; the future is spawned on the loop and the caller
//!   receives a [`CallHandle`] once it has started.
//! - `wait` blocks the caller on that handle, waking at least every
//!   `poll_interval` to re-check the deadline and the connection epoch. A call
//!   whose epoch was superseded is cancelled and reported as `ConnectionReset`,
//!   even if a result arrived in the meantime.
//!
//! The bridge never retries. Retry policy belongs to the caller.

mod call;

pub use call::{CallHandle, LoopStats, LoopStatsSnapshot};

use crate::core::epoch::EpochCounter;
use crate::core::errors::{BridgeError, UpstreamError};
use crate::core::metrics;
use crate::core::upstream::{GatewayClient, GatewayEvent};
use anyhow::{Context, Result, anyhow};
use call::PendingGuard;
use futures::future::LocalBoxFuture;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{RecvTimeoutError, sync_channel};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tracing::{debug, error, info, warn};

/// Name of the thread that owns the gateway client.
pub const LOOP_THREAD_NAME: &str = "gateway-loop";

/// How long `start` waits for the loop thread to come up.
const LOOP_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// A unit of work executed on the loop thread with exclusive access to the client.
type Job<C> = Box<dyn FnOnce(&mut C) + Send>;

/// The future a submitted closure hands back for the loop to drive.
pub type UpstreamFuture<T> = LocalBoxFuture<'static, Result<T, UpstreamError>>;

/// Receives gateway events on the loop thread.
pub type EventHandler = Box<dyn FnMut(GatewayEvent) + Send>;

/// The single owner of the gateway client and its event loop.
pub struct AsyncBridge<C: GatewayClient> {
    sender: Mutex<Option<mpsc::UnboundedSender<Job<C>>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<LoopStats>,
    epoch: Arc<EpochCounter>,
    poll_interval: Duration,
}

impl<C: GatewayClient> AsyncBridge<C> {
    /// Creates a bridge with no loop running. Every call reports `NoLoop`
    /// until `start` succeeds.
    pub fn new(epoch: Arc<EpochCounter>, poll_interval: Duration) -> Self {
        Self {
            sender: Mutex::new(None),
            thread: Mutex::new(None),
            stats: Arc::new(LoopStats::default()),
            epoch,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Spawns the loop thread, builds the client on it with `factory`, and
    /// forwards the client's events to `on_event`. Returns once the loop is
    /// accepting work.
    pub fn start<F>(&self, factory: F, on_event: EventHandler) -> Result<()>
    where
        F: FnOnce() -> C + Send + 'static,
    {
        let mut sender_slot = self.sender.lock();
        if sender_slot.is_some() {
            return Err(anyhow!("gateway loop is already running"));
        }

        let (job_tx, job_rx) = mpsc::unbounded_channel::<Job<C>>();
        let (ready_tx, ready_rx) = sync_channel::<Result<(), String>>(1);
        let stats = self.stats.clone();

        let handle = std::thread::Builder::new()
            .name(LOOP_THREAD_NAME.to_string())
            .spawn(move || run_loop(factory, on_event, job_rx, ready_tx, stats))
            .context("Failed to spawn the gateway loop thread")?;

        match ready_rx.recv_timeout(LOOP_STARTUP_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(anyhow!("gateway loop failed to start: {e}"));
            }
            Err(_) => return Err(anyhow!("gateway loop did not start within {LOOP_STARTUP_TIMEOUT:?}")),
        }

        *sender_slot = Some(job_tx);
        *self.thread.lock() = Some(handle);
        info!("Gateway loop thread started.");
        Ok(())
    }

    /// Closes the job channel and joins the loop thread. Pending calls are
    /// dropped, which their waiters observe as `Cancelled`.
    pub fn stop(&self) {
        let sender = self.sender.lock().take();
        if sender.is_none() {
            return;
        }
        drop(sender);
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                error!("Gateway loop thread panicked during shutdown.");
            }
        }
        info!("Gateway loop thread stopped.");
    }

    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some() && self.stats.running.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> LoopStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn epoch(&self) -> &Arc<EpochCounter> {
        &self.epoch
    }

    fn dispatch(&self, job: Job<C>) -> Result<(), BridgeError> {
        let sender = self.sender.lock().clone().ok_or(BridgeError::NoLoop)?;
        sender.send(job).map_err(|_| BridgeError::NoLoop)
    }

    /// Schedules `start_call` on the loop thread and blocks up to
    /// `invoke_timeout` until it has run and its future has been spawned.
    ///
    /// `start_call` is never invoked on the caller's thread. A synchronous
    /// failure inside it is reported as `InvokeError`.
    pub fn submit<T, F>(&self, start_call: F, invoke_timeout: Duration) -> Result<CallHandle<T>, BridgeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<UpstreamFuture<T>, UpstreamError> + Send + 'static,
    {
        let (started_tx, started_rx) = sync_channel(1);
        let (result_tx, result_rx) = sync_channel::<Result<T, UpstreamError>>(1);
        let stats = self.stats.clone();

        let job: Job<C> = Box::new(move |client: &mut C| match start_call(client) {
            Ok(future) => {
                let guard = PendingGuard::enter(stats);
                let task = tokio::task::spawn_local(async move {
                    let _guard = guard;
                    let outcome = future.await;
                    let _ = result_tx.send(outcome);
                });
                let abort = task.abort_handle();
                // The caller gave up before the call started; nobody will read the result.
                if started_tx.send(Ok(abort.clone())).is_err() {
                    abort.abort();
                }
            }
            Err(e) => {
                let _ = started_tx.send(Err(e));
            }
        });
        let submitted_at = Instant::now();
        self.dispatch(job)?;

        match started_rx.recv_timeout(invoke_timeout) {
            Ok(Ok(abort)) => Ok(CallHandle {
                result_rx,
                abort,
                submitted_at,
            }),
            Ok(Err(e)) => {
                metrics::BRIDGE_CALLS.with_label_values(&["invoke-error"]).inc();
                Err(BridgeError::InvokeError(e))
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout_ms = invoke_timeout.as_millis() as u64, "bridge call did not start in time");
                metrics::BRIDGE_CALLS.with_label_values(&["invoke-timeout"]).inc();
                Err(BridgeError::InvokeTimeout(invoke_timeout))
            }
            // The job was dropped unexecuted: the loop is shutting down.
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::NoLoop),
        }
    }

    /// Blocks until `handle` completes, `timeout` elapses, or the epoch moves
    /// away from `expected_epoch`. The latter two cancel the loop-side task.
    pub fn wait<T>(&self, handle: CallHandle<T>, timeout: Duration, expected_epoch: Option<u64>) -> Result<T, BridgeError> {
        let deadline = Instant::now() + timeout;

        let outcome = loop {
            if let Some(reset) = self.check_epoch(expected_epoch) {
                handle.cancel();
                break Err(reset);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                handle.cancel();
                break Err(BridgeError::Timeout(timeout));
            }
            match handle.result_rx.recv_timeout(self.poll_interval.min(remaining)) {
                Ok(result) => {
                    // A reply computed against a superseded connection is never surfaced.
                    if let Some(reset) = self.check_epoch(expected_epoch) {
                        break Err(reset);
                    }
                    break result.map_err(BridgeError::Upstream);
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break Err(BridgeError::Cancelled),
            }
        };

        let label = match &outcome {
            Ok(_) => "ok",
            Err(e) => e.code(),
        };
        metrics::BRIDGE_CALLS.with_label_values(&[label]).inc();
        if let Err(e) = &outcome {
            debug!(elapsed_ms = handle.elapsed().as_millis() as u64, "bridge wait ended: {e}");
        }
        outcome
    }

    fn check_epoch(&self, expected: Option<u64>) -> Option<BridgeError> {
        let expected = expected?;
        let current = self.epoch.current();
        (current != expected).then_some(BridgeError::ConnectionReset { expected, current })
    }

    /// `submit` followed by `wait`.
    pub fn call<T, F>(
        &self,
        start_call: F,
        invoke_timeout: Duration,
        timeout: Duration,
        expected_epoch: Option<u64>,
    ) -> Result<T, BridgeError>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<UpstreamFuture<T>, UpstreamError> + Send + 'static,
    {
        let handle = self.submit(start_call, invoke_timeout)?;
        self.wait(handle, timeout, expected_epoch)
    }

    /// Runs a synchronous closure against the client on the loop thread.
    pub fn query<R, F>(&self, f: F, invoke_timeout: Duration) -> Result<R, BridgeError>
    where
        R: Send + 'static,
        F: FnOnce(&mut C) -> R + Send + 'static,
    {
        let (tx, rx) = sync_channel(1);
        self.dispatch(Box::new(move |client: &mut C| {
            let _ = tx.send(f(client));
        }))?;
        match rx.recv_timeout(invoke_timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(BridgeError::InvokeTimeout(invoke_timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::NoLoop),
        }
    }
}

impl<C: GatewayClient> Drop for AsyncBridge<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The body of the loop thread.
fn run_loop<C, F>(
    factory: F,
    mut on_event: EventHandler,
    mut jobs: mpsc::UnboundedReceiver<Job<C>>,
    ready_tx: std::sync::mpsc::SyncSender<Result<(), String>>,
    stats: Arc<LoopStats>,
) where
    C: GatewayClient,
    F: FnOnce() -> C,
{
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }
    };

    let local = LocalSet::new();
    local.block_on(&runtime, async move {
        let mut client = factory();

        if let Some(mut events) = client.take_events() {
            tokio::task::spawn_local(async move {
                while let Some(event) = events.recv().await {
                    on_event(event);
                }
                debug!("Gateway event stream closed.");
            });
        }

        stats.running.store(true, Ordering::Relaxed);
        let _ = ready_tx.send(Ok(()));

        while let Some(job) = jobs.recv().await {
            job(&mut client);
            stats.jobs_executed.fetch_add(1, Ordering::Relaxed);
            // Let freshly spawned calls make progress before the next job.
            tokio::task::yield_now().await;
        }

        if client.is_connected() {
            client.disconnect();
        }
        stats.running.store(false, Ordering::Relaxed);
    });
}
