//! Test data builders for creating test objects

use rigsync::config::{AcquisitionConfig, PeripheralSpec, RigConfig, TimeoutPolicy};
use rigsync::types::PeripheralKind;
use rigsync::wire::{encode, DaqScan, FrameTime, LickSample, MotionSample};
use std::collections::BTreeMap;

/// Builder for a config pointing at the built binary
pub struct RigConfigBuilder {
    config: RigConfig,
}

impl RigConfigBuilder {
    pub fn new() -> Self {
        let config = RigConfig {
            timeouts: TimeoutPolicy::fast(),
            ..RigConfig::default()
        };
        Self { config }
    }

    pub fn preview(mut self, enabled: bool) -> Self {
        self.config.acquisition.preview = enabled;
        self
    }

    pub fn acquisition(mut self, acquisition: AcquisitionConfig) -> Self {
        self.config.acquisition = acquisition;
        self
    }

    pub fn timeouts(mut self, timeouts: TimeoutPolicy) -> Self {
        self.config.timeouts = timeouts;
        self
    }

    pub fn peripheral(mut self, kind: PeripheralKind, socket_base: &str, command: Vec<String>) -> Self {
        self.config.peripherals.push(PeripheralSpec {
            kind,
            socket_base: socket_base.to_string(),
            command,
            env: BTreeMap::new(),
            enabled: true,
            watch_liveness: false,
        });
        self
    }

    pub fn build(self) -> RigConfig {
        self.config
    }
}

/// Encoded motion feed with `n` samples starting at `t0`
pub fn motion_bytes(t0: f64, n: usize) -> Vec<u8> {
    let samples: Vec<MotionSample> = (0..n)
        .map(|i| MotionSample::new(t0 + i as f64 * 0.001, 0.001, i as f64, -(i as f64)))
        .collect();
    encode(&samples)
}

/// Encoded frame timestamps
pub fn frame_bytes(times: &[f64]) -> Vec<u8> {
    let frames: Vec<FrameTime> = times.iter().copied().map(FrameTime).collect();
    encode(&frames)
}

/// Encoded lick samples
pub fn lick_bytes(rows: &[(f64, f64)]) -> Vec<u8> {
    let licks: Vec<LickSample> = rows
        .iter()
        .map(|&(t, amplitude)| LickSample { t, amplitude })
        .collect();
    encode(&licks)
}

/// Scans with the frame channel high for `high` samples out of every
/// `period`
pub fn scans(n: usize, period: usize, high: usize, code_a: u32, code_b: u32) -> Vec<DaqScan> {
    (0..n)
        .map(|i| {
            let frame = if i % period < high { 65535 } else { 32768 };
            DaqScan::new(code_a, code_b, frame)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_motion_bytes_stride() {
        assert_eq!(motion_bytes(0.0, 3).len(), 96);
    }
}
