//! Raw scan codes to physical units.

use super::calibration::Calibration;
use crate::config::AcquisitionConfig;
use crate::wire::DaqScan;

/// One read's worth of converted samples, index-aligned across channels
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConvertedBlock {
    pub channel_a: Vec<f32>,
    pub channel_b: Vec<f32>,
    pub frames: Vec<bool>,
}

impl ConvertedBlock {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.channel_a.clear();
        self.channel_b.clear();
        self.frames.clear();
    }
}

/// Converts decoded scans using each channel's calibration and gain
#[derive(Debug, Clone)]
pub struct ScanConverter {
    cal_a: Calibration,
    cal_b: Calibration,
    cal_frame: Calibration,
    gain_a: f64,
    gain_b: f64,
    frame_threshold: f64,
}

impl ScanConverter {
    pub fn new(config: &AcquisitionConfig) -> Self {
        Self {
            cal_a: config.channel_a.calibration.clone(),
            cal_b: config.channel_b.calibration.clone(),
            cal_frame: config.frame_channel.calibration.clone(),
            gain_a: config.channel_a.gain,
            gain_b: config.channel_b.gain,
            frame_threshold: config.frame_threshold,
        }
    }

    pub fn frame_threshold(&self) -> f64 {
        self.frame_threshold
    }

    pub fn convert(&self, scans: &[DaqScan]) -> ConvertedBlock {
        let mut block = ConvertedBlock::default();
        self.convert_into(scans, &mut block);
        block
    }

    /// Convert into a reused block (cleared first).
    pub fn convert_into(&self, scans: &[DaqScan], block: &mut ConvertedBlock) {
        block.clear();
        block.channel_a.reserve(scans.len());
        block.channel_b.reserve(scans.len());
        block.frames.reserve(scans.len());
        for scan in scans {
            block
                .channel_a
                .push((self.cal_a.to_physical(scan.code_a) / self.gain_a) as f32);
            block
                .channel_b
                .push((self.cal_b.to_physical(scan.code_b) / self.gain_b) as f32);
            block
                .frames
                .push(self.cal_frame.to_physical(scan.code_frame) > self.frame_threshold);
        }
    }
}
