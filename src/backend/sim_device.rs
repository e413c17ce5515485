//! Simulated acquisition device
//!
//! Stands in for the sampling hardware in the `daq` helper when no driver is
//! available, and in tests. Two ways to fill the ring buffer:
//!
//! - **Scripted**: queue exact bytes or scans with [`SimulatedDevice::push_bytes`]
//!   / [`SimulatedDevice::push_scans`]. Useful for alignment tests, since a
//!   queued chunk may end mid-scan.
//! - **Generated**: with a [`SyntheticSignal`] attached, scans are produced at
//!   the configured sample interval while the acquisition runs, using the
//!   patterns below for each channel.
//!
//! Scans that do not fit in the ring buffer are lost, as on real hardware.
//!
//! # Example
//!
//! ```ignore
//! use rigsync::backend::{SimulatedDevice, SyntheticSignal};
//!
//! let mut device = SimulatedDevice::new(1 << 20)
//!     .with_signal(SyntheticSignal::default());
//! device.start()?;
//! ```

use super::device::AcquisitionDevice;
use crate::error::{Result, RigError};
use crate::pipeline::calibration::Calibration;
use crate::wire::{encode, DaqScan};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default ring buffer size (bytes)
pub const DEFAULT_BUFFER_CAPACITY: usize = 1 << 22;

/// Waveform for one simulated channel, in volts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalPattern {
    /// Fixed voltage
    Constant(f64),
    /// `offset + amplitude * sin(2 pi f t)`
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    /// Alternates between `low` and `high`; `period` in samples
    Square { period: u64, low: f64, high: f64 },
}

impl SignalPattern {
    /// Voltage of sample `index` taken `interval` apart
    pub fn volts(&self, index: u64, interval: Duration) -> f64 {
        match *self {
            SignalPattern::Constant(v) => v,
            SignalPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => {
                let t = index as f64 * interval.as_secs_f64();
                offset + amplitude * (2.0 * std::f64::consts::PI * frequency * t).sin()
            }
            SignalPattern::Square { period, low, high } => {
                let period = period.max(2);
                if index % period < period / 2 {
                    low
                } else {
                    high
                }
            }
        }
    }
}

/// Generated scans for all three channels
#[derive(Debug, Clone)]
pub struct SyntheticSignal {
    pub channel_a: SignalPattern,
    pub channel_b: SignalPattern,
    pub frames: SignalPattern,
    pub sample_interval: Duration,
    /// Maps volts back to raw codes
    pub calibration: Calibration,
}

impl Default for SyntheticSignal {
    fn default() -> Self {
        Self {
            channel_a: SignalPattern::Sine {
                frequency: 5.0,
                amplitude: 0.5,
                offset: -0.06,
            },
            channel_b: SignalPattern::Sine {
                frequency: 80.0,
                amplitude: 0.02,
                offset: 0.0,
            },
            // 60 Hz frame clock at 50 kHz sampling
            frames: SignalPattern::Square {
                period: 833,
                low: 0.0,
                high: 5.0,
            },
            sample_interval: Duration::from_micros(20),
            calibration: Calibration::default(),
        }
    }
}

impl SyntheticSignal {
    fn scan(&self, index: u64) -> DaqScan {
        let code = |pattern: &SignalPattern| {
            self.calibration
                .to_code(pattern.volts(index, self.sample_interval))
                .unwrap_or(0)
        };
        DaqScan::new(
            code(&self.channel_a),
            code(&self.channel_b),
            code(&self.frames),
        )
    }
}

/// In-memory ring buffer fed by scripts or a synthetic signal
#[derive(Debug)]
pub struct SimulatedDevice {
    buffer: VecDeque<u8>,
    capacity: usize,
    running: bool,
    signal: Option<SyntheticSignal>,
    started_at: Option<Instant>,
    generated: u64,
    lost_bytes: u64,
    fail_start: bool,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl SimulatedDevice {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::new(),
            capacity,
            running: false,
            signal: None,
            started_at: None,
            generated: 0,
            lost_bytes: 0,
            fail_start: false,
        }
    }

    pub fn with_signal(mut self, signal: SyntheticSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Make [`AcquisitionDevice::start`] fail, as a device that cannot be opened
    pub fn failing(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Queue raw bytes; they may end mid-scan.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        let room = self.capacity.saturating_sub(self.buffer.len());
        let accepted = bytes.len().min(room);
        self.buffer.extend(&bytes[..accepted]);
        self.lost_bytes += (bytes.len() - accepted) as u64;
    }

    pub fn push_scans(&mut self, scans: &[DaqScan]) {
        self.push_bytes(&encode(scans));
    }

    /// Bytes dropped because the ring buffer was full
    pub fn lost_bytes(&self) -> u64 {
        self.lost_bytes
    }

    /// Scans produced by the synthetic signal
    pub fn generated_scans(&self) -> u64 {
        self.generated
    }

    fn generate(&mut self) {
        let (Some(signal), Some(started_at), true) = (&self.signal, self.started_at, self.running)
        else {
            return;
        };
        let interval = signal.sample_interval.as_nanos().max(1);
        let due = (started_at.elapsed().as_nanos() / interval) as u64;
        if due <= self.generated {
            return;
        }
        let scans: Vec<DaqScan> = (self.generated..due).map(|i| signal.scan(i)).collect();
        self.generated = due;
        self.push_scans(&scans);
    }
}

impl AcquisitionDevice for SimulatedDevice {
    fn start(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(RigError::Device("simulated device refused to start".into()));
        }
        self.running = true;
        self.started_at = Some(Instant::now());
        self.generated = 0;
        Ok(())
    }

    fn cancel(&mut self) -> Result<()> {
        self.generate();
        self.running = false;
        Ok(())
    }

    fn buffered_bytes(&mut self) -> Result<usize> {
        self.generate();
        Ok(self.buffer.len())
    }

    fn buffer_capacity(&self) -> usize {
        self.capacity
    }

    fn read(&mut self, max_bytes: usize) -> Result<Vec<u8>> {
        let n = max_bytes.min(self.buffer.len());
        Ok(self.buffer.drain(..n).collect())
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn describe(&self) -> String {
        format!("simulated device ({} byte buffer)", self.capacity)
    }
}
