//! Acquisition executor: the tight loop of the streaming pipeline.
//!
//! Each [`AcquisitionPipeline::pump`]:
//! 1. Polls the device fill level; returns early below the read threshold.
//! 2. Warns when the ring buffer is more than half full.
//! 3. Reads, prepends the carried partial scan and decodes whole scans.
//! 4. Converts to physical units.
//! 5. Appends to the temp files (must succeed), then offers a decimated
//!    copy to the preview sinks (may drop).
//!
//! The stop sequence is split so the caller can report the stop timestamp
//! before the slow part: [`AcquisitionPipeline::cancel_and_drain`] cancels
//! and reads the buffered tail, [`AcquisitionPipeline::finish`] closes the
//! temp files and consolidates.

use super::consolidate::{consolidate, Consolidated};
use super::convert::{ConvertedBlock, ScanConverter};
use super::sinks::{output_stem, ChannelFiles, PreviewFanout, PreviewSink};
use crate::backend::device::AcquisitionDevice;
use crate::config::AcquisitionConfig;
use crate::error::{Result, ResultExt, RigError};
use crate::types::{wall_clock_secs, AcquisitionStats};
use crate::wire::{DaqScan, FeedDecoder};
use std::path::{Path, PathBuf};

/// An armed recording
#[derive(Debug)]
struct ActiveRecording {
    output: PathBuf,
    files: ChannelFiles,
}

/// Streams scans from a device into temp files and previews
pub struct AcquisitionPipeline<D: AcquisitionDevice, S: PreviewSink> {
    device: D,
    config: AcquisitionConfig,
    converter: ScanConverter,
    decoder: FeedDecoder<DaqScan>,
    preview: PreviewFanout<S>,
    block: ConvertedBlock,
    active: Option<ActiveRecording>,
    stats: AcquisitionStats,
}

impl<D: AcquisitionDevice, S: PreviewSink> AcquisitionPipeline<D, S> {
    pub fn new(device: D, config: AcquisitionConfig, preview: PreviewFanout<S>) -> Self {
        Self {
            converter: ScanConverter::new(&config),
            device,
            config,
            decoder: FeedDecoder::new(),
            preview,
            block: ConvertedBlock::default(),
            active: None,
            stats: AcquisitionStats::default(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn preview_mut(&mut self) -> &mut PreviewFanout<S> {
        &mut self.preview
    }

    pub fn stats(&self) -> &AcquisitionStats {
        &self.stats
    }

    pub fn is_armed(&self) -> bool {
        self.active.is_some()
    }

    /// Output path of the armed recording
    pub fn output(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.output.as_path())
    }

    /// Bytes held back waiting for the rest of their scan
    pub fn carry_len(&self) -> usize {
        self.decoder.carry_len()
    }

    /// Open the temp files for `output` and start the device.
    ///
    /// Returns the acquisition start time (seconds since the epoch).
    pub fn arm(&mut self, output: &Path) -> Result<f64> {
        if let Some(active) = &self.active {
            return Err(RigError::Device(format!(
                "already recording to {}",
                active.output.display()
            )));
        }
        let files = ChannelFiles::create(&output_stem(output), &self.config)?;
        self.decoder.reset();
        self.preview.reset_phase();
        self.stats = AcquisitionStats::default();

        self.device
            .start()
            .with_context(|| format!("starting {}", self.device.describe()))?;
        let started = wall_clock_secs();
        self.active = Some(ActiveRecording {
            output: output.to_path_buf(),
            files,
        });
        tracing::info!(output = %output.display(), "Acquisition armed");
        Ok(started)
    }

    /// One iteration of the streaming loop. Returns the scans processed.
    pub fn pump(&mut self) -> Result<usize> {
        if self.active.is_none() {
            return Ok(0);
        }
        let buffered = self.device.buffered_bytes()?;
        if buffered < self.config.min_read_bytes {
            return Ok(0);
        }
        if buffered > self.device.buffer_capacity() / 2 {
            self.stats.overrun_warnings += 1;
            tracing::warn!(
                buffered,
                capacity = self.device.buffer_capacity(),
                "Acquisition buffer more than half full"
            );
        }
        self.read_and_process(buffered)
    }

    fn read_and_process(&mut self, max_bytes: usize) -> Result<usize> {
        let bytes = match self.device.read(max_bytes) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.failed_reads += 1;
                tracing::warn!("Device read failed: {}", e);
                return Ok(0);
            }
        };
        self.stats.reads += 1;
        self.stats.bytes_read += bytes.len() as u64;

        let scans = self.decoder.push(&bytes);
        if scans.is_empty() {
            return Ok(0);
        }
        self.converter.convert_into(&scans, &mut self.block);

        if let Some(active) = self.active.as_mut() {
            active.files.append(&self.block)?;
        }
        self.stats.preview_drops += self.preview.forward(&self.block);
        self.stats.scans += scans.len() as u64;
        Ok(scans.len())
    }

    /// Cancel the acquisition and process everything still buffered.
    ///
    /// Returns the stop time (seconds since the epoch), taken right after
    /// the cancel.
    pub fn cancel_and_drain(&mut self) -> Result<f64> {
        if let Err(e) = self.device.cancel() {
            tracing::error!("Cancelling acquisition failed: {}", e);
        }
        let stopped = wall_clock_secs();

        loop {
            let buffered = self.device.buffered_bytes()?;
            if buffered == 0 {
                break;
            }
            let before = self.stats.bytes_read;
            self.read_and_process(buffered)?;
            if self.stats.bytes_read == before {
                tracing::warn!("Device stopped returning data with {} bytes buffered", buffered);
                break;
            }
        }

        let stray = self.decoder.reset();
        if stray > 0 {
            tracing::warn!("Discarding {} bytes of an incomplete final scan", stray);
        }
        Ok(stopped)
    }

    /// Close the temp files and consolidate the recording.
    pub fn finish(&mut self) -> Result<Consolidated> {
        let Some(active) = self.active.take() else {
            return Err(RigError::Device("no recording to finish".into()));
        };
        let output = active.output.clone();
        active
            .files
            .finish()
            .map_err(|e| RigError::Consolidation {
                path: output.clone(),
                message: e.to_string(),
            })?;
        tracing::info!(
            reads = self.stats.reads,
            scans = self.stats.scans,
            avg_read = self.stats.avg_read_bytes(),
            preview_drops = self.stats.preview_drops,
            overruns = self.stats.overrun_warnings,
            "Acquisition finished"
        );
        consolidate(&output, &self.config)
    }

    /// Full stop sequence: cancel, drain, consolidate.
    pub fn stop(&mut self) -> Result<(f64, Consolidated)> {
        let stopped = self.cancel_and_drain()?;
        let consolidated = self.finish()?;
        Ok((stopped, consolidated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::device::MockAcquisitionDevice;
    use crate::backend::sim_device::SimulatedDevice;
    use crate::pipeline::recording::Recording;
    use crate::wire::encode;
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use tempfile::tempdir;

    fn config(min_read_bytes: usize) -> AcquisitionConfig {
        AcquisitionConfig {
            min_read_bytes,
            ..Default::default()
        }
    }

    fn scans(range: std::ops::Range<u32>) -> Vec<DaqScan> {
        let cal = crate::pipeline::calibration::Calibration::default();
        let high = cal.to_code(5.0).unwrap();
        range
            .map(|i| DaqScan::new(i, i, if i % 4 < 2 { 0 } else { high }))
            .collect()
    }

    fn no_preview() -> PreviewFanout<Sender<Vec<u8>>> {
        PreviewFanout::new(4)
    }

    #[test]
    fn test_partial_scan_is_carried() {
        let dir = tempdir().unwrap();
        let bytes = encode(&scans(0..3));
        let mut pipeline = AcquisitionPipeline::new(SimulatedDevice::new(1024), config(1), no_preview());
        pipeline.arm(&dir.path().join("s.rec")).unwrap();

        pipeline.device_mut().push_bytes(&bytes[..29]);
        assert_eq!(pipeline.pump().unwrap(), 2);
        assert_eq!(pipeline.carry_len(), 5);

        pipeline.device_mut().push_bytes(&bytes[29..36]);
        assert_eq!(pipeline.pump().unwrap(), 1);
        assert_eq!(pipeline.carry_len(), 0);
        assert_eq!(pipeline.stats().scans, 3);
    }

    #[test]
    fn test_below_threshold_does_not_read() {
        let dir = tempdir().unwrap();
        let mut pipeline =
            AcquisitionPipeline::new(SimulatedDevice::new(1 << 16), config(120), no_preview());
        pipeline.arm(&dir.path().join("s.rec")).unwrap();
        pipeline.device_mut().push_scans(&scans(0..9));
        assert_eq!(pipeline.pump().unwrap(), 0);
        assert_eq!(pipeline.stats().reads, 0);
        pipeline.device_mut().push_scans(&scans(9..10));
        assert_eq!(pipeline.pump().unwrap(), 10);
    }

    #[test]
    fn test_overrun_warning_counted() {
        let dir = tempdir().unwrap();
        let mut pipeline = AcquisitionPipeline::new(SimulatedDevice::new(48), config(12), no_preview());
        pipeline.arm(&dir.path().join("s.rec")).unwrap();
        pipeline.device_mut().push_scans(&scans(0..3));
        pipeline.pump().unwrap();
        assert_eq!(pipeline.stats().overrun_warnings, 1);
    }

    #[test]
    fn test_stop_drains_tail_below_threshold() {
        let dir = tempdir().unwrap();
        let output = dir.path().join("s.rec");
        let mut pipeline =
            AcquisitionPipeline::new(SimulatedDevice::new(1 << 16), config(12 * 100), no_preview());
        pipeline.arm(&output).unwrap();
        pipeline.device_mut().push_scans(&scans(0..8));
        assert_eq!(pipeline.pump().unwrap(), 0);

        let (stopped, consolidated) = pipeline.stop().unwrap();
        assert!(stopped > 0.0);
        assert_eq!(consolidated.samples, 8);
        // Frames low,low,high,high,... -> edges after 1, 3, 5
        assert_eq!(consolidated.edges, 3);
        assert!(!pipeline.is_armed());

        let recording = Recording::read(&output).unwrap();
        assert_eq!(recording.channel_a.len(), 8);
    }

    #[test]
    fn test_preview_gets_every_fourth_sample() {
        let dir = tempdir().unwrap();
        let (txa, rxa): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = unbounded();
        let (txb, _rxb) = unbounded();
        let (txf, _rxf) = unbounded();
        let preview = PreviewFanout::with_sinks(4, txa, txb, txf);
        let mut pipeline = AcquisitionPipeline::new(SimulatedDevice::new(1 << 16), config(12), preview);
        pipeline.arm(&dir.path().join("s.rec")).unwrap();
        pipeline.device_mut().push_scans(&scans(0..10));
        pipeline.pump().unwrap();
        pipeline.device_mut().push_scans(&scans(10..16));
        pipeline.pump().unwrap();

        let received: usize = rxa.try_iter().map(|p| p.len() / 4).sum();
        assert_eq!(received, 4);
        assert_eq!(pipeline.stats().preview_drops, 0);
    }

    #[test]
    fn test_file_failure_is_fatal() {
        let dir = tempdir().unwrap();
        let mut pipeline = AcquisitionPipeline::new(SimulatedDevice::new(1024), config(12), no_preview());
        // Output inside a path that is a file, not a directory
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        assert!(pipeline.arm(&blocker.join("s.rec")).is_err());
        assert!(!pipeline.is_armed());
    }

    #[test]
    fn test_device_start_failure() {
        let dir = tempdir().unwrap();
        let mut device = MockAcquisitionDevice::new();
        device
            .expect_start()
            .returning(|| Err(RigError::Device("no such subdevice".into())));
        device
            .expect_describe()
            .returning(|| "mock".to_string());
        let mut pipeline = AcquisitionPipeline::new(device, config(12), no_preview());
        let err = pipeline.arm(&dir.path().join("s.rec")).unwrap_err();
        assert!(err.is_peripheral_fatal());
        assert!(!pipeline.is_armed());
    }

    #[test]
    fn test_read_failure_is_counted_not_fatal() {
        let dir = tempdir().unwrap();
        let mut device = MockAcquisitionDevice::new();
        device.expect_start().returning(|| Ok(()));
        device.expect_buffered_bytes().returning(|| Ok(240));
        device.expect_buffer_capacity().return_const(1usize << 16);
        device
            .expect_read()
            .returning(|_| Err(RigError::Device("EIO".into())));
        let mut pipeline = AcquisitionPipeline::new(device, config(12), no_preview());
        pipeline.arm(&dir.path().join("s.rec")).unwrap();
        assert_eq!(pipeline.pump().unwrap(), 0);
        assert_eq!(pipeline.stats().failed_reads, 1);
    }

    #[test]
    fn test_arm_twice_rejected() {
        let dir = tempdir().unwrap();
        let mut pipeline = AcquisitionPipeline::new(SimulatedDevice::new(1024), config(12), no_preview());
        pipeline.arm(&dir.path().join("a.rec")).unwrap();
        assert!(pipeline.arm(&dir.path().join("b.rec")).is_err());
        assert_eq!(pipeline.output(), Some(dir.path().join("a.rec").as_path()));
    }
}
