// tests/integration/request_flow_test.rs

//! Integration tests for the request path under a running supervisor
//! Tests: concurrent admission, reconnect recovery, fatal heartbeat loss

use super::test_helpers::{TestContext, eventually};
use gatebridge::RequestGuard;
use gatebridge::core::errors::BridgeError;
use gatebridge::core::upstream::SimulatedGateway;
use gatebridge::core::upstream::simulated::HeartbeatMode;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_concurrent_requests_respect_group_capacity() {
    let ctx = TestContext::new();
    ctx.supervisor.spawn().unwrap();
    assert!(eventually(Duration::from_secs(2), || ctx.is_ready()));

    let max_seen = AtomicUsize::new(0);
    let succeeded = AtomicUsize::new(0);
    let state = &ctx.state;

    thread::scope(|s| {
        for i in 0..8u32 {
            let max_seen = &max_seen;
            let succeeded = &succeeded;
            s.spawn(move || {
                let guard = RequestGuard::enter(state, "quote", "market", Duration::from_secs(3));
                assert!(guard.is_admitted(), "{:?}", guard.rejection());
                max_seen.fetch_max(state.locks.group("market").inflight(), Ordering::SeqCst);

                let value = guard
                    .call(
                        move |gw: &mut SimulatedGateway| Ok(gw.echo(i, Duration::from_millis(40))),
                        Duration::from_secs(2),
                    )
                    .unwrap();
                assert_eq!(value, i);
                succeeded.fetch_add(1, Ordering::SeqCst);
            });
        }
    });

    assert_eq!(succeeded.load(Ordering::SeqCst), 8);
    assert!(max_seen.load(Ordering::SeqCst) <= 2);
    assert_eq!(ctx.state.locks.group("market").inflight(), 0);
}

#[test]
fn test_requests_recover_after_gateway_restart() {
    let ctx = TestContext::new();
    ctx.supervisor.spawn().unwrap();
    assert!(eventually(Duration::from_secs(2), || ctx.is_ready()));
    let before = ctx.epoch();

    ctx.control.drop_connection();
    // Readiness only returns through a promotion, which advances the epoch.
    assert!(eventually(Duration::from_secs(1), || {
        !ctx.is_ready() || ctx.epoch() > before
    }));

    let guard = RequestGuard::enter(&ctx.state, "positions", "portfolio", Duration::from_secs(2));
    assert!(guard.is_admitted());
    assert!(guard.epoch().unwrap() > before);

    let value = guard
        .call(
            |gw: &mut SimulatedGateway| Ok(gw.echo("ok", Duration::ZERO)),
            Duration::from_secs(1),
        )
        .unwrap();
    assert_eq!(value, "ok");
}

#[test]
fn test_inflight_call_is_reset_by_reconnect() {
    let ctx = TestContext::new();
    ctx.supervisor.spawn().unwrap();
    assert!(eventually(Duration::from_secs(2), || ctx.is_ready()));

    let guard = RequestGuard::enter(&ctx.state, "chain", "options", Duration::from_secs(1));
    let pinned = guard.epoch().unwrap();

    let control = ctx.control.clone();
    let dropper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        control.drop_connection();
    });

    let start = Instant::now();
    let result = guard.call(
        |gw: &mut SimulatedGateway| Ok(gw.echo(1u32, Duration::from_secs(5))),
        Duration::from_secs(5),
    );
    dropper.join().unwrap();

    match result {
        Err(BridgeError::ConnectionReset { expected, current }) => {
            assert_eq!(expected, pinned);
            assert!(current > pinned);
        }
        other => panic!("expected connection-reset, got {other:?}"),
    }
    assert!(start.elapsed() < Duration::from_secs(3));
}

#[test]
fn test_requests_wait_out_a_short_outage() {
    let ctx = TestContext::new();
    ctx.control.set_refuse_connects(true);
    ctx.supervisor.spawn().unwrap();

    let control = ctx.control.clone();
    let healer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        control.set_refuse_connects(false);
    });

    let guard = RequestGuard::enter(&ctx.state, "account", "portfolio", Duration::from_secs(2));
    healer.join().unwrap();

    assert!(guard.is_admitted());
    assert!(guard.ready_wait() >= Duration::from_millis(100));
    assert!(ctx.control.connect_attempts() >= 2);
}

#[test]
fn test_sustained_heartbeat_loss_is_fatal() {
    let ctx = TestContext::new();
    ctx.supervisor.spawn().unwrap();
    assert!(eventually(Duration::from_secs(2), || ctx.is_ready()));

    ctx.control.set_heartbeat_mode(HeartbeatMode::Fail);

    assert!(eventually(Duration::from_secs(3), || ctx.fatal.calls() == 1));
    assert!(ctx.supervisor.is_terminated());
    assert!(!ctx.is_ready());

    thread::sleep(Duration::from_millis(100));
    assert_eq!(ctx.fatal.calls(), 1);
}
