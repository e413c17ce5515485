//! Consolidated recording file format
//!
//! ```text
//! magic       8 bytes   "RSREC\0\x01\0"
//! header_len  u32 LE
//! header      header_len bytes of JSON (RecordingHeader)
//! channel A   samples x f32 LE
//! channel B   samples x f32 LE   (absent when header.channels == 1)
//! ```
//!
//! The frame-marker edge list is stored next to it in `<stem>_edge.bin` as
//! `i32` LE indices.

use crate::error::{Result, ResultExt, RigError};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// File magic, including the format version
pub const MAGIC: &[u8; 8] = b"RSREC\0\x01\0";

/// Upper bound on a header; anything larger is a corrupt file
const MAX_HEADER_LEN: u32 = 1 << 20;

/// `<stem>_edge.bin`
pub fn edge_path(stem: &Path) -> PathBuf {
    super::sinks::temp_path(stem, "edge")
}

/// Recording metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingHeader {
    /// Sample interval in `time_units`
    pub sample_interval: f64,
    pub time_units: String,
    /// Names of channel A and channel B
    pub channel_names: [String; 2],
    /// Units of channel A and channel B
    pub channel_units: [String; 2],
    /// Channels stored: 2, or 1 for a channel-A-only rescue
    #[serde(default = "two_channels")]
    pub channels: u8,
    /// Samples per channel
    pub samples: u64,
    /// Frame-marker transitions in the edge file
    pub edges: u64,
    pub created: DateTime<Utc>,
}

fn two_channels() -> u8 {
    2
}

/// A consolidated recording
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub header: RecordingHeader,
    pub channel_a: Vec<f32>,
    pub channel_b: Vec<f32>,
}

impl Recording {
    pub fn write(&self, path: &Path) -> Result<()> {
        let expected_b = match self.header.channels {
            1 => 0,
            2 => self.channel_a.len(),
            n => {
                return Err(RigError::Consolidation {
                    path: path.to_path_buf(),
                    message: format!("unsupported channel count {}", n),
                })
            }
        };
        if self.channel_b.len() != expected_b
            || self.channel_a.len() as u64 != self.header.samples
        {
            return Err(RigError::Consolidation {
                path: path.to_path_buf(),
                message: format!(
                    "channel lengths {}/{} disagree with header ({})",
                    self.channel_a.len(),
                    self.channel_b.len(),
                    self.header.samples
                ),
            });
        }

        let header = serde_json::to_vec(&self.header)?;
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        let mut out = BufWriter::new(file);

        let write = |out: &mut BufWriter<File>| -> std::io::Result<()> {
            out.write_all(MAGIC)?;
            out.write_u32::<LittleEndian>(header.len() as u32)?;
            out.write_all(&header)?;
            for &v in &self.channel_a {
                out.write_f32::<LittleEndian>(v)?;
            }
            for &v in &self.channel_b {
                out.write_f32::<LittleEndian>(v)?;
            }
            out.flush()?;
            out.get_ref().sync_all()
        };
        write(&mut out).with_context(|| format!("writing {}", path.display()))
    }

    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let file_len = file
            .metadata()
            .with_context(|| format!("reading {}", path.display()))?
            .len();
        let mut input = BufReader::new(file);

        let mut magic = [0u8; 8];
        input
            .read_exact(&mut magic)
            .with_context(|| format!("reading {}", path.display()))?;
        if &magic != MAGIC {
            return Err(RigError::Serialization(format!(
                "{} is not a recording",
                path.display()
            )));
        }

        let header_len = input
            .read_u32::<LittleEndian>()
            .with_context(|| format!("reading {}", path.display()))?;
        if header_len > MAX_HEADER_LEN {
            return Err(RigError::Serialization(format!(
                "header of {} is {} bytes",
                path.display(),
                header_len
            )));
        }
        let mut header = vec![0u8; header_len as usize];
        input
            .read_exact(&mut header)
            .with_context(|| format!("reading {}", path.display()))?;
        let header: RecordingHeader = serde_json::from_slice(&header)?;
        if !(1..=2).contains(&header.channels) {
            return Err(RigError::Serialization(format!(
                "{} has {} channels",
                path.display(),
                header.channels
            )));
        }

        // Every channel must fit in what is left of the file
        let available = file_len.saturating_sub(12 + header_len as u64);
        let needed = header.samples.checked_mul(4 * header.channels as u64);
        if needed.map_or(true, |needed| needed > available) {
            return Err(RigError::Serialization(format!(
                "{} claims {} samples but holds {} sample bytes",
                path.display(),
                header.samples,
                available
            )));
        }

        let samples = header.samples as usize;
        let mut channel_a = vec![0f32; samples];
        let mut channel_b = vec![0f32; if header.channels == 2 { samples } else { 0 }];
        input
            .read_f32_into::<LittleEndian>(&mut channel_a)
            .and_then(|_| input.read_f32_into::<LittleEndian>(&mut channel_b))
            .with_context(|| format!("reading samples of {}", path.display()))?;

        Ok(Self {
            header,
            channel_a,
            channel_b,
        })
    }
}

/// Write frame-marker edge indices.
pub fn write_edges(path: &Path, edges: &[i32]) -> Result<()> {
    let mut bytes = Vec::with_capacity(edges.len() * 4);
    for &e in edges {
        bytes.write_i32::<LittleEndian>(e)?;
    }
    std::fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

/// Read frame-marker edge indices.
pub fn read_edges(path: &Path) -> Result<Vec<i32>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut edges = vec![0i32; bytes.len() / 4];
    (&bytes[..edges.len() * 4])
        .read_i32_into::<LittleEndian>(&mut edges)
        .with_context(|| format!("decoding {}", path.display()))?;
    Ok(edges)
}
