//! Centralized timeout policy
//!
//! Every bounded wait in the crate reads its deadline from one
//! [`TimeoutPolicy`]. Values are stored as integer milliseconds (idle sleep in
//! microseconds) so the TOML file stays readable, and are exposed as
//! [`Duration`]s.

use crate::types::PeripheralKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default wait for a spawned child to connect back
pub const DEFAULT_ACCEPT_MS: u64 = 5_000;

/// Default wait for the `"ready"` reply
pub const DEFAULT_HANDSHAKE_MS: u64 = 5_000;

/// Default liveness window; a peer silent for longer is marked disconnected
pub const DEFAULT_LIVENESS_MS: u64 = 500;

/// Default wait for the `"close"` acknowledgement during teardown
pub const DEFAULT_CLOSE_MS: u64 = 1_000;

/// Default wait for the acquisition helper's `"close"`; covers a final
/// consolidation and the mirror wait
pub const DEFAULT_CONSOLIDATE_MS: u64 = 300_000;

/// Default wait for background mirror copies before a helper exits
pub const DEFAULT_MIRROR_MS: u64 = 60_000;

/// Default idle sleep of the acquisition loop, in microseconds
pub const DEFAULT_IDLE_SLEEP_US: u64 = 100;

/// Timeouts for every blocking or bounded operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutPolicy {
    /// Supervisor accept wait
    pub accept_ms: u64,
    /// Parent-side wait for `"ready"`
    pub handshake_ms: u64,
    /// Child-side wait for the parent's socket to appear
    pub connect_back_ms: u64,
    /// Silence tolerated before a watched link is marked disconnected
    pub liveness_ms: u64,
    /// Wait for `"close"` after sending `"quit"`
    pub close_ms: u64,
    /// Bound on retrying a control send that would block
    pub send_ms: u64,
    /// Host wait for the acquisition helper's `"primed"`
    pub primed_ms: u64,
    /// Host wait for an acquisition start/stop timestamp
    pub timestamp_ms: u64,
    /// Wait for the acquisition helper's `"close"`, which it only sends
    /// once consolidation and mirroring are over
    pub consolidate_ms: u64,
    /// Helper-side wait for mirror copies still running at exit
    pub mirror_ms: u64,
    /// Sleep between idle polls, in microseconds
    pub idle_sleep_us: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            accept_ms: DEFAULT_ACCEPT_MS,
            handshake_ms: DEFAULT_HANDSHAKE_MS,
            connect_back_ms: 5_000,
            liveness_ms: DEFAULT_LIVENESS_MS,
            close_ms: DEFAULT_CLOSE_MS,
            send_ms: 100,
            primed_ms: 5_000,
            timestamp_ms: 2_000,
            consolidate_ms: DEFAULT_CONSOLIDATE_MS,
            mirror_ms: DEFAULT_MIRROR_MS,
            idle_sleep_us: DEFAULT_IDLE_SLEEP_US,
        }
    }
}

impl TimeoutPolicy {
    pub fn accept(&self) -> Duration {
        Duration::from_millis(self.accept_ms)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub fn connect_back(&self) -> Duration {
        Duration::from_millis(self.connect_back_ms)
    }

    pub fn liveness(&self) -> Duration {
        Duration::from_millis(self.liveness_ms)
    }

    pub fn close(&self) -> Duration {
        Duration::from_millis(self.close_ms)
    }

    pub fn send(&self) -> Duration {
        Duration::from_millis(self.send_ms)
    }

    pub fn primed(&self) -> Duration {
        Duration::from_millis(self.primed_ms)
    }

    pub fn timestamp(&self) -> Duration {
        Duration::from_millis(self.timestamp_ms)
    }

    pub fn consolidate(&self) -> Duration {
        Duration::from_millis(self.consolidate_ms)
    }

    pub fn mirror(&self) -> Duration {
        Duration::from_millis(self.mirror_ms)
    }

    /// Teardown wait for one peripheral. The acquisition helper may still
    /// be consolidating when `"quit"` arrives.
    pub fn close_for(&self, kind: PeripheralKind) -> Duration {
        match kind {
            PeripheralKind::Acquisition => self.consolidate().max(self.close()),
            _ => self.close(),
        }
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_micros(self.idle_sleep_us)
    }

    /// A policy with every wait shortened, for tests that exercise timeouts.
    pub fn fast() -> Self {
        Self {
            accept_ms: 500,
            handshake_ms: 500,
            connect_back_ms: 1_000,
            liveness_ms: 100,
            close_ms: 200,
            send_ms: 50,
            primed_ms: 1_000,
            timestamp_ms: 500,
            consolidate_ms: 5_000,
            mirror_ms: 1_000,
            idle_sleep_us: 100,
        }
    }

    /// Check that no timeout is zero, which would turn a bounded wait into a
    /// single attempt.
    pub fn validate(&self) -> Result<(), String> {
        let fields = [
            ("accept_ms", self.accept_ms),
            ("handshake_ms", self.handshake_ms),
            ("connect_back_ms", self.connect_back_ms),
            ("liveness_ms", self.liveness_ms),
            ("close_ms", self.close_ms),
            ("send_ms", self.send_ms),
            ("primed_ms", self.primed_ms),
            ("timestamp_ms", self.timestamp_ms),
            ("consolidate_ms", self.consolidate_ms),
            ("mirror_ms", self.mirror_ms),
        ];
        for (name, value) in fields {
            if value == 0 {
                return Err(format!("timeouts.{} must be greater than zero", name));
            }
        }
        Ok(())
    }
}
