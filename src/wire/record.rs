//! Fixed-stride record types carried on peripheral feeds.
//!
//! All records are little-endian. Each type knows its stride and how to read
//! itself from exactly `STRIDE` bytes.

use byteorder::{ByteOrder, LittleEndian};

/// A fixed-stride binary record.
pub trait Record: Copy + Sized {
    /// Byte length of one complete record.
    const STRIDE: usize;

    /// Decode from a slice of exactly `STRIDE` bytes.
    fn read(chunk: &[u8]) -> Self;

    /// Append the encoded record to `out`.
    fn write(&self, out: &mut Vec<u8>);
}

/// One motion-sensor sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionSample {
    /// Wall-clock time of the sample (s)
    pub t: f64,
    /// Interval since the previous sample (s)
    pub dt: f64,
    pub y: f64,
    pub x: f64,
}

impl MotionSample {
    pub fn new(t: f64, dt: f64, y: f64, x: f64) -> Self {
        Self { t, dt, y, x }
    }

    /// The placeholder sample used when a poll yields nothing.
    pub fn idle(t: f64) -> Self {
        Self {
            t,
            ..Default::default()
        }
    }
}

impl Record for MotionSample {
    const STRIDE: usize = 32;

    fn read(chunk: &[u8]) -> Self {
        Self {
            t: LittleEndian::read_f64(&chunk[0..8]),
            dt: LittleEndian::read_f64(&chunk[8..16]),
            y: LittleEndian::read_f64(&chunk[16..24]),
            x: LittleEndian::read_f64(&chunk[24..32]),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; 32];
        LittleEndian::write_f64(&mut buf[0..8], self.t);
        LittleEndian::write_f64(&mut buf[8..16], self.dt);
        LittleEndian::write_f64(&mut buf[16..24], self.y);
        LittleEndian::write_f64(&mut buf[24..32], self.x);
        out.extend_from_slice(&buf);
    }
}

/// Camera frame timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameTime(pub f64);

impl Record for FrameTime {
    const STRIDE: usize = 8;

    fn read(chunk: &[u8]) -> Self {
        FrameTime(LittleEndian::read_f64(chunk))
    }

    fn write(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; 8];
        LittleEndian::write_f64(&mut buf, self.0);
        out.extend_from_slice(&buf);
    }
}

/// Lick-sensor sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LickSample {
    pub t: f64,
    pub amplitude: f64,
}

impl Record for LickSample {
    const STRIDE: usize = 16;

    fn read(chunk: &[u8]) -> Self {
        Self {
            t: LittleEndian::read_f64(&chunk[0..8]),
            amplitude: LittleEndian::read_f64(&chunk[8..16]),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; 16];
        LittleEndian::write_f64(&mut buf[0..8], self.t);
        LittleEndian::write_f64(&mut buf[8..16], self.amplitude);
        out.extend_from_slice(&buf);
    }
}

/// Reshape lick samples into an N x 2 `(t, amplitude)` table.
pub fn lick_table(samples: &[LickSample]) -> Vec<[f64; 2]> {
    samples.iter().map(|s| [s.t, s.amplitude]).collect()
}

/// Signed byte sample (image sensor, frame-marker preview).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteSample(pub i8);

impl Record for ByteSample {
    const STRIDE: usize = 1;

    fn read(chunk: &[u8]) -> Self {
        ByteSample(chunk[0] as i8)
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.push(self.0 as u8);
    }
}

/// Analog preview sample in physical units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AnalogSample(pub f32);

impl Record for AnalogSample {
    const STRIDE: usize = 4;

    fn read(chunk: &[u8]) -> Self {
        AnalogSample(LittleEndian::read_f32(chunk))
    }

    fn write(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; 4];
        LittleEndian::write_f32(&mut buf, self.0);
        out.extend_from_slice(&buf);
    }
}

/// One hardware scan: two analog codes and the frame-marker code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DaqScan {
    pub code_a: u32,
    pub code_b: u32,
    pub code_frame: u32,
}

impl DaqScan {
    pub fn new(code_a: u32, code_b: u32, code_frame: u32) -> Self {
        Self {
            code_a,
            code_b,
            code_frame,
        }
    }
}

impl Record for DaqScan {
    // 3 channels x 4 bytes
    const STRIDE: usize = 12;

    fn read(chunk: &[u8]) -> Self {
        Self {
            code_a: LittleEndian::read_u32(&chunk[0..4]),
            code_b: LittleEndian::read_u32(&chunk[4..8]),
            code_frame: LittleEndian::read_u32(&chunk[8..12]),
        }
    }

    fn write(&self, out: &mut Vec<u8>) {
        let mut buf = [0u8; 12];
        LittleEndian::write_u32(&mut buf[0..4], self.code_a);
        LittleEndian::write_u32(&mut buf[4..8], self.code_b);
        LittleEndian::write_u32(&mut buf[8..12], self.code_frame);
        out.extend_from_slice(&buf);
    }
}
