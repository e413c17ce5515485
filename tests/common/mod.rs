//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use rigsync::config::TimeoutPolicy;
use rigsync::link::Link;
use rigsync::supervisor::{connect_back, Peripheral, SpawnOptions, Supervisor};
use rigsync::types::PeripheralKind;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

static NEXT_BASE: AtomicU32 = AtomicU32::new(0);

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(100)
}

/// Socket base name unique to this test process and call
pub fn unique_base(tag: &str) -> String {
    format!(
        "rigsync-it-{}-{}-{}-",
        tag,
        std::process::id(),
        NEXT_BASE.fetch_add(1, Ordering::Relaxed)
    )
}

/// Attach an in-process peer under `suffix`. Returns the host side and the
/// peer's link.
pub fn attach_peer(kind: PeripheralKind, base: &str, suffix: u32) -> (Peripheral, Link) {
    let policy = TimeoutPolicy::fast();
    let peer_base = base.to_string();
    let peer = std::thread::spawn(move || {
        connect_back(
            &peer_base,
            suffix,
            Duration::from_secs(2),
            Duration::from_secs(2),
        )
    });
    let peripheral = Supervisor::new(policy)
        .spawn_and_handshake(kind, base, &[], "ctx", &SpawnOptions::attach(suffix))
        .expect("attach peripheral");
    let (link, _) = peer
        .join()
        .expect("peer thread")
        .expect("peer handshake");
    (peripheral, link)
}

/// Poll `f` until it returns true or `timeout` passes
pub fn wait_for(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    f()
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

/// Timeouts for tests that launch the real helper binary
pub fn helper_policy() -> TimeoutPolicy {
    TimeoutPolicy {
        accept_ms: 10_000,
        handshake_ms: 5_000,
        connect_back_ms: 5_000,
        liveness_ms: 2_000,
        close_ms: 5_000,
        primed_ms: 10_000,
        timestamp_ms: 5_000,
        ..TimeoutPolicy::fast()
    }
}
