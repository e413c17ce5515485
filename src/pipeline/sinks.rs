//! Fan-out targets for converted samples.
//!
//! Every sample goes to the per-channel temp files; a write failure there is
//! an error. A decimated copy goes to the preview sinks, where a refused
//! payload is counted and forgotten.

use super::convert::ConvertedBlock;
use crate::config::AcquisitionConfig;
use crate::error::{Result, ResultExt};
use crate::link::Link;
use crate::wire::{encode, AnalogSample, ByteSample};
use byteorder::{LittleEndian, WriteBytesExt};
use crossbeam_channel::{Sender, TrySendError};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// `<stem>_<suffix>.bin`
pub fn temp_path(stem: &Path, suffix: &str) -> PathBuf {
    let mut name = stem.as_os_str().to_owned();
    name.push(format!("_{}.bin", suffix));
    PathBuf::from(name)
}

/// Output path with its extension removed
pub fn output_stem(output: &Path) -> PathBuf {
    output.with_extension("")
}

/// Temp file paths for channel A, channel B and frame markers
pub fn temp_paths(stem: &Path, config: &AcquisitionConfig) -> [PathBuf; 3] {
    [
        temp_path(stem, &config.channel_a.file_suffix),
        temp_path(stem, &config.channel_b.file_suffix),
        temp_path(stem, &config.frame_channel.file_suffix),
    ]
}

// ==================== Temp files ====================

/// Append-only per-channel temp files.
///
/// Analog channels are `f32` LE, frame markers one byte (0/1) per sample.
#[derive(Debug)]
pub struct ChannelFiles {
    paths: [PathBuf; 3],
    channel_a: BufWriter<File>,
    channel_b: BufWriter<File>,
    frames: BufWriter<File>,
    samples: u64,
}

impl ChannelFiles {
    pub fn create(stem: &Path, config: &AcquisitionConfig) -> Result<Self> {
        let paths = temp_paths(stem, config);
        if let Some(parent) = stem.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let open = |path: &PathBuf| -> Result<BufWriter<File>> {
            File::create(path)
                .map(BufWriter::new)
                .with_context(|| format!("creating temp file {}", path.display()))
        };
        Ok(Self {
            channel_a: open(&paths[0])?,
            channel_b: open(&paths[1])?,
            frames: open(&paths[2])?,
            paths,
            samples: 0,
        })
    }

    pub fn paths(&self) -> &[PathBuf; 3] {
        &self.paths
    }

    /// Samples written so far
    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn append(&mut self, block: &ConvertedBlock) -> Result<()> {
        for &v in &block.channel_a {
            self.channel_a
                .write_f32::<LittleEndian>(v)
                .with_context(|| format!("writing {}", self.paths[0].display()))?;
        }
        for &v in &block.channel_b {
            self.channel_b
                .write_f32::<LittleEndian>(v)
                .with_context(|| format!("writing {}", self.paths[1].display()))?;
        }
        let markers: Vec<u8> = block.frames.iter().map(|&f| f as u8).collect();
        self.frames
            .write_all(&markers)
            .with_context(|| format!("writing {}", self.paths[2].display()))?;
        self.samples += block.len() as u64;
        Ok(())
    }

    /// Flush and close all three files.
    pub fn finish(mut self) -> Result<[PathBuf; 3]> {
        for (writer, path) in [
            (&mut self.channel_a, &self.paths[0]),
            (&mut self.channel_b, &self.paths[1]),
            (&mut self.frames, &self.paths[2]),
        ] {
            writer
                .flush()
                .with_context(|| format!("flushing {}", path.display()))?;
            writer
                .get_ref()
                .sync_all()
                .with_context(|| format!("syncing {}", path.display()))?;
        }
        Ok(self.paths)
    }
}

// ==================== Preview ====================

/// Outcome of offering one preview payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    /// Dropped; the sink may take the next one
    Busy,
    /// Dropped; the sink is gone for good
    Closed,
}

/// Best-effort destination for preview payloads
pub trait PreviewSink {
    /// Whether a payload offered now would be taken whole
    fn ready(&mut self) -> bool;

    /// Hand over one payload without blocking.
    fn offer(&mut self, payload: &[u8]) -> Offer;
}

impl PreviewSink for Link {
    fn ready(&mut self) -> bool {
        !self.is_connected() || self.flush_pending()
    }

    fn offer(&mut self, payload: &[u8]) -> Offer {
        if !self.is_connected() {
            return Offer::Closed;
        }
        match Link::offer(self, payload) {
            true => Offer::Accepted,
            false if self.is_connected() => Offer::Busy,
            false => Offer::Closed,
        }
    }
}

impl PreviewSink for Sender<Vec<u8>> {
    fn ready(&mut self) -> bool {
        !self.is_full()
    }

    fn offer(&mut self, payload: &[u8]) -> Offer {
        match self.try_send(payload.to_vec()) {
            Ok(()) => Offer::Accepted,
            Err(TrySendError::Full(_)) => Offer::Busy,
            Err(TrySendError::Disconnected(_)) => Offer::Closed,
        }
    }
}

/// Forwards every Nth sample of all three channels to optional sinks.
///
/// The same indices are taken from every channel and the decimation phase
/// carries over between blocks, so the preview is an evenly spaced,
/// time-aligned subsequence of the full stream. A block is forwarded to
/// every sink or to none, so a busy sink never puts the channels out of
/// step; a sink that has gone away is removed.
#[derive(Debug)]
pub struct PreviewFanout<S: PreviewSink> {
    channel_a: Option<S>,
    channel_b: Option<S>,
    frames: Option<S>,
    decimation: usize,
    /// Index in the next block of the first sample to forward
    offset: usize,
    drops: u64,
}

impl<S: PreviewSink> PreviewFanout<S> {
    pub fn new(decimation: usize) -> Self {
        Self {
            channel_a: None,
            channel_b: None,
            frames: None,
            decimation: decimation.max(1),
            offset: 0,
            drops: 0,
        }
    }

    pub fn with_sinks(decimation: usize, channel_a: S, channel_b: S, frames: S) -> Self {
        Self {
            channel_a: Some(channel_a),
            channel_b: Some(channel_b),
            frames: Some(frames),
            ..Self::new(decimation)
        }
    }

    pub fn decimation(&self) -> usize {
        self.decimation
    }

    /// Payloads refused so far
    pub fn drops(&self) -> u64 {
        self.drops
    }

    pub fn has_sinks(&self) -> bool {
        self.channel_a.is_some() || self.channel_b.is_some() || self.frames.is_some()
    }

    /// Remove and return the sinks
    pub fn take_sinks(&mut self) -> (Option<S>, Option<S>, Option<S>) {
        (
            self.channel_a.take(),
            self.channel_b.take(),
            self.frames.take(),
        )
    }

    /// Restart decimation at the first sample of the next block.
    pub fn reset_phase(&mut self) {
        self.offset = 0;
    }

    /// Forward the decimated block. Returns the number of dropped payloads.
    pub fn forward(&mut self, block: &ConvertedBlock) -> u64 {
        let len = block.len();
        let picks: Vec<usize> = (self.offset..len).step_by(self.decimation).collect();
        self.offset = match picks.last() {
            Some(&last) => last + self.decimation - len,
            None => self.offset - len,
        };

        if picks.is_empty() || !self.has_sinks() {
            return 0;
        }

        let a: Vec<AnalogSample> = picks.iter().map(|&i| AnalogSample(block.channel_a[i])).collect();
        let b: Vec<AnalogSample> = picks.iter().map(|&i| AnalogSample(block.channel_b[i])).collect();
        let f: Vec<ByteSample> = picks
            .iter()
            .map(|&i| ByteSample(block.frames[i] as i8))
            .collect();

        let mut dropped = 0;
        let mut sinks = [&mut self.channel_a, &mut self.channel_b, &mut self.frames];
        let present = sinks.iter().filter(|s| s.is_some()).count() as u64;
        if !sinks.iter_mut().flat_map(|s| s.as_mut()).all(|s| s.ready()) {
            tracing::trace!("Preview busy, dropping block of {} samples", picks.len());
            self.drops += present;
            return present;
        }
        for (sink, payload) in sinks.into_iter().zip([encode(&a), encode(&b), encode(&f)]) {
            let Some(target) = sink.as_mut() else {
                continue;
            };
            match target.offer(&payload) {
                Offer::Accepted => {}
                Offer::Busy => dropped += 1,
                Offer::Closed => {
                    tracing::debug!("Preview sink closed, removing it");
                    *sink = None;
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            tracing::trace!("Dropped {} preview payloads", dropped);
        }
        self.drops += dropped;
        dropped
    }
}
