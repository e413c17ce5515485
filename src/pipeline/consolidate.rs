//! Stop-sequence consolidation: temp files to one recording plus edge list.
//!
//! Temp files are left in place afterwards so a failed or interrupted
//! consolidation can be re-run with [`rescue`]. When a channel's temp file
//! is lost, [`rescue_single_channel`] keeps channel A alone and
//! [`rescue_frames_only`] recovers just the frame-marker edges.

use super::recording::{edge_path, write_edges, Recording, RecordingHeader};
use super::sinks::{output_stem, temp_paths};
use crate::config::AcquisitionConfig;
use crate::error::{Result, RigError};
use byteorder::{LittleEndian, ReadBytesExt};
use std::path::{Path, PathBuf};

/// What a consolidation produced
#[derive(Debug, Clone, PartialEq)]
pub struct Consolidated {
    pub output: PathBuf,
    pub edge_file: PathBuf,
    /// The temp files the output was rebuilt from
    pub temp_files: Vec<PathBuf>,
    pub samples: usize,
    pub edges: usize,
}

impl Consolidated {
    /// Every file worth mirroring
    pub fn files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.output.clone(), self.edge_file.clone()];
        files.extend(self.temp_files.iter().cloned());
        files
    }
}

/// Indices `i` where `frames[i + 1] != frames[i]`.
pub fn find_edges(frames: &[bool]) -> Vec<i32> {
    frames
        .windows(2)
        .enumerate()
        .filter(|(_, w)| w[0] != w[1])
        .map(|(i, _)| i as i32)
        .collect()
}

fn consolidation_error(path: &Path, message: impl Into<String>) -> RigError {
    RigError::Consolidation {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn read_f32_file(path: &Path) -> Result<Vec<f32>> {
    let bytes = std::fs::read(path).map_err(|e| consolidation_error(path, e.to_string()))?;
    if bytes.len() % 4 != 0 {
        tracing::warn!(
            "{} ends in a partial sample ({} stray bytes)",
            path.display(),
            bytes.len() % 4
        );
    }
    let mut values = vec![0f32; bytes.len() / 4];
    (&bytes[..values.len() * 4])
        .read_f32_into::<LittleEndian>(&mut values)
        .map_err(|e| consolidation_error(path, e.to_string()))?;
    Ok(values)
}

fn read_frame_file(path: &Path) -> Result<Vec<bool>> {
    let bytes = std::fs::read(path).map_err(|e| consolidation_error(path, e.to_string()))?;
    Ok(bytes.into_iter().map(|b| b != 0).collect())
}

fn frame_edges(frames: &[bool]) -> Vec<i32> {
    if frames.first() == Some(&true) {
        tracing::warn!("First frame marker is high; the first edge may be missing");
    }
    find_edges(frames)
}

fn write_edge_file(stem: &Path, edges: &[i32]) -> Result<PathBuf> {
    let edge_file = edge_path(stem);
    write_edges(&edge_file, edges).map_err(|e| consolidation_error(&edge_file, e.to_string()))?;
    Ok(edge_file)
}

/// Rebuild `output` and its edge file from the temp files under its stem.
pub fn consolidate(output: &Path, config: &AcquisitionConfig) -> Result<Consolidated> {
    consolidate_channels(output, config, 2)
}

fn consolidate_channels(
    output: &Path,
    config: &AcquisitionConfig,
    channels: u8,
) -> Result<Consolidated> {
    let stem = output_stem(output);
    let [path_a, path_b, path_frames] = temp_paths(&stem, config);

    let mut channel_a = read_f32_file(&path_a)?;
    let mut channel_b = match channels {
        2 => read_f32_file(&path_b)?,
        _ => Vec::new(),
    };
    let mut frames = read_frame_file(&path_frames)?;

    let mut samples = channel_a.len().min(frames.len());
    if channels == 2 {
        samples = samples.min(channel_b.len());
    }
    let expected_b = if channels == 2 { samples } else { 0 };
    if channel_a.len() != samples || channel_b.len() != expected_b || frames.len() != samples {
        tracing::warn!(
            "Temp files disagree on length ({}/{}/{}), keeping {} samples",
            channel_a.len(),
            channel_b.len(),
            frames.len(),
            samples
        );
        channel_a.truncate(samples);
        channel_b.truncate(samples);
        frames.truncate(samples);
    }

    let edges = frame_edges(&frames);

    let recording = Recording {
        header: RecordingHeader {
            sample_interval: config.sample_interval_ms,
            time_units: config.time_units.clone(),
            channel_names: [config.channel_a.name.clone(), config.channel_b.name.clone()],
            channel_units: [config.channel_a.units.clone(), config.channel_b.units.clone()],
            channels,
            samples: samples as u64,
            edges: edges.len() as u64,
            created: chrono::Utc::now(),
        },
        channel_a,
        channel_b,
    };
    recording
        .write(output)
        .map_err(|e| consolidation_error(output, e.to_string()))?;

    let edge_file = write_edge_file(&stem, &edges)?;

    tracing::info!(
        output = %output.display(),
        samples,
        channels,
        edges = edges.len(),
        "Recording consolidated"
    );

    let mut temp_files = vec![path_a];
    if channels == 2 {
        temp_files.push(path_b);
    }
    temp_files.push(path_frames);
    Ok(Consolidated {
        output: output.to_path_buf(),
        edge_file,
        temp_files,
        samples,
        edges: edges.len(),
    })
}

/// Re-run consolidation from temp files left by an earlier session.
pub fn rescue(output: &Path, config: &AcquisitionConfig) -> Result<Consolidated> {
    tracing::info!("Rescuing {} from temp files", output.display());
    consolidate(output, config)
}

/// Rescue from channel A and the frame markers only, for sessions whose
/// channel B temp file is missing or unusable.
pub fn rescue_single_channel(output: &Path, config: &AcquisitionConfig) -> Result<Consolidated> {
    tracing::info!("Rescuing channel A of {} from temp files", output.display());
    consolidate_channels(output, config, 1)
}

/// Recover only the frame-marker edge file. Returns its path and the number
/// of edges.
pub fn rescue_frames_only(output: &Path, config: &AcquisitionConfig) -> Result<(PathBuf, usize)> {
    tracing::info!("Rescuing frame edges of {}", output.display());
    let stem = output_stem(output);
    let [_, _, path_frames] = temp_paths(&stem, config);
    let edges = frame_edges(&read_frame_file(&path_frames)?);
    let edge_file = write_edge_file(&stem, &edges)?;
    tracing::info!(edges = edges.len(), "Frame edges rescued to {}", edge_file.display());
    Ok((edge_file, edges.len()))
}
