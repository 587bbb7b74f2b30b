use gatebridge::config::LocksConfig;
use gatebridge::core::locks::{AcquirePolicy, DEFAULT_GROUP, LockRegistry};
use std::sync::{Arc, mpsc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn registry(groups: &[(&str, usize)]) -> LockRegistry {
    LockRegistry::new(
        groups.iter().map(|(name, cap)| (name.to_string(), *cap)),
        2,
        AcquirePolicy {
            timeout: Duration::from_millis(500),
            max_attempts: 3,
            backoff: Duration::from_millis(10),
        },
        Duration::from_secs(8),
    )
}

#[test]
fn test_default_group_always_present() {
    let locks = registry(&[("market", 2)]);
    let snapshot = locks.snapshot();
    assert_eq!(snapshot.get(DEFAULT_GROUP).map(|s| s.capacity), Some(2));
    assert_eq!(snapshot.get("market").map(|s| s.capacity), Some(2));
}

#[test]
fn test_unknown_group_falls_back_to_default() {
    let locks = registry(&[("market", 2)]);
    assert_eq!(locks.group("no-such-group").name(), DEFAULT_GROUP);

    let acq = locks.acquire("no-such-group", Duration::from_millis(50), 1, Duration::ZERO);
    assert!(acq.acquired);
    assert_eq!(locks.group(DEFAULT_GROUP).inflight(), 1);
    assert!(locks.release("no-such-group", Duration::from_millis(1)));
    assert_eq!(locks.group(DEFAULT_GROUP).inflight(), 0);
}

#[test]
fn test_zero_capacity_is_clamped_to_one() {
    let locks = registry(&[("orders", 0)]);
    assert_eq!(locks.group("orders").capacity(), 1);
}

#[test]
fn test_acquire_fails_when_full_after_timeout() {
    let locks = registry(&[("historical", 1)]);
    assert!(locks.acquire("historical", Duration::from_millis(50), 1, Duration::ZERO).acquired);

    let start = Instant::now();
    let second = locks.acquire("historical", Duration::from_millis(100), 3, Duration::from_millis(10));
    assert!(!second.acquired);
    assert!(second.waited >= Duration::from_millis(100));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(locks.group("historical").inflight(), 1);
}

#[test]
fn test_backoff_applies_between_attempts() {
    let locks = Arc::new(registry(&[("historical", 1)]));
    assert!(locks.acquire("historical", Duration::from_millis(50), 1, Duration::ZERO).acquired);

    // The slot frees during the backoff after the first 500ms attempt, so it is
    // only taken once the second attempt starts at about 700ms.
    let releaser = {
        let locks = locks.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(550));
            assert!(locks.release("historical", Duration::from_millis(550)));
        })
    };
    let second = locks.acquire("historical", Duration::from_secs(1), 2, Duration::from_millis(200));
    releaser.join().unwrap();

    assert!(second.acquired);
    assert!(second.waited >= Duration::from_millis(680), "waited {:?}", second.waited);
    assert!(second.waited < Duration::from_secs(1));
}

#[test]
fn test_single_attempt_waits_for_release() {
    let locks = Arc::new(registry(&[("historical", 1)]));
    assert!(locks.acquire("historical", Duration::from_millis(50), 1, Duration::ZERO).acquired);

    let releaser = {
        let locks = locks.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            assert!(locks.release("historical", Duration::from_millis(150)));
        })
    };
    let second = locks.acquire("historical", Duration::from_secs(1), 1, Duration::from_millis(200));
    releaser.join().unwrap();

    assert!(second.acquired);
    assert!(second.waited >= Duration::from_millis(140));
    assert!(second.waited < Duration::from_millis(600), "waited {:?}", second.waited);
}

#[test]
fn test_double_release_is_noop() {
    let locks = registry(&[("portfolio", 1)]);
    assert!(locks.acquire("portfolio", Duration::from_millis(50), 1, Duration::ZERO).acquired);
    assert!(locks.release("portfolio", Duration::from_millis(5)));
    assert!(!locks.release("portfolio", Duration::from_millis(5)));
    assert_eq!(locks.group("portfolio").inflight(), 0);
}

#[test]
fn test_snapshot_records_hold_statistics() {
    let locks = registry(&[("market", 2)]);
    for hold_ms in [30, 120, 40] {
        assert!(locks.acquire("market", Duration::from_millis(50), 1, Duration::ZERO).acquired);
        locks.release("market", Duration::from_millis(hold_ms));
    }
    let snapshot = locks.snapshot()["market"].clone();
    assert_eq!(snapshot.inflight, 0);
    assert_eq!(snapshot.last_hold_ms, Some(40));
    assert_eq!(snapshot.max_hold_ms, 120);
    assert!(snapshot.last_acquire_at.is_some());
    assert!(snapshot.last_acquire_ms.is_some());
}

#[test]
fn test_capacity_one_serializes_instead_of_rejecting() {
    let locks = Arc::new(registry(&[("historical", 1)]));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let (held_tx, held_rx) = mpsc::channel();

    let first = {
        let locks = locks.clone();
        let max_seen = max_seen.clone();
        thread::spawn(move || {
            let acq = locks.acquire("historical", Duration::from_secs(2), 1, Duration::ZERO);
            assert!(acq.acquired);
            max_seen.fetch_max(locks.group("historical").inflight(), Ordering::SeqCst);
            held_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(200));
            locks.release("historical", Duration::from_millis(200));
        })
    };

    held_rx.recv().unwrap();
    let second = locks.acquire("historical", Duration::from_secs(2), 1, Duration::ZERO);
    assert!(second.acquired, "second request must wait, not be rejected");
    assert!(second.waited >= Duration::from_millis(100));
    max_seen.fetch_max(locks.group("historical").inflight(), Ordering::SeqCst);
    locks.release("historical", Duration::from_millis(1));

    first.join().unwrap();
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    assert_eq!(locks.group("historical").inflight(), 0);
}

#[test]
fn test_slow_group_does_not_block_fast_group() {
    let locks = registry(&[("historical", 1), ("market", 2)]);
    assert!(locks.acquire("historical", Duration::from_millis(50), 1, Duration::ZERO).acquired);

    let start = Instant::now();
    assert!(locks.acquire("market", Duration::from_secs(1), 1, Duration::ZERO).acquired);
    assert!(start.elapsed() < Duration::from_millis(100));
}

#[test]
fn test_scoped_permit_releases_on_drop() {
    let locks = registry(&[("options", 2)]);
    {
        let permit = locks.scoped("options", Duration::from_millis(50)).expect("slot available");
        assert_eq!(permit.group(), "options");
        assert_eq!(locks.group("options").inflight(), 1);
    }
    assert_eq!(locks.group("options").inflight(), 0);
    assert!(locks.snapshot()["options"].last_hold_ms.is_some());
}

#[test]
fn test_concurrent_acquire_release_respects_capacity() {
    let locks = Arc::new(registry(&[("market", 3)]));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let handles: Vec<_> = (0..12)
        .map(|_| {
            let locks = locks.clone();
            let max_seen = max_seen.clone();
            thread::spawn(move || {
                for _ in 0..20 {
                    let acq = locks.acquire("market", Duration::from_secs(5), 1, Duration::ZERO);
                    assert!(acq.acquired);
                    max_seen.fetch_max(locks.group("market").inflight(), Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(1));
                    assert!(locks.release("market", Duration::from_millis(1)));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(max_seen.load(Ordering::SeqCst) <= 3);
    assert_eq!(locks.group("market").inflight(), 0);
}

#[test]
fn test_from_config_uses_configured_groups() {
    let locks = LockRegistry::from_config(&LocksConfig::default());
    let snapshot = locks.snapshot();
    assert_eq!(snapshot["historical"].capacity, 1);
    assert_eq!(snapshot["market"].capacity, 2);
    assert_eq!(snapshot["orders"].capacity, 1);
    assert_eq!(locks.policy().max_attempts, 5);
    assert_eq!(locks.warn_threshold(), Duration::from_millis(8000));
}
