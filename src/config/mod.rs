//! Configuration module for rigsync
//!
//! This module handles configuration for the host and for the helper
//! processes:
//! - The centralized [`TimeoutPolicy`] used by every bounded wait
//! - Acquisition settings (sample interval, gains, calibration, preview decimation)
//! - Secondary-storage mirroring of session output
//! - The table of peripherals the host spawns
//!
//! # Config Location
//!
//! The default configuration file lives in the platform config directory:
//! - **Linux**: `~/.config/rigsync/rigsync.toml`
//! - **macOS**: `~/Library/Application Support/rigsync/rigsync.toml`
//!
//! Host and helpers are given the same `--config` path, so both sides derive
//! identical socket names and timeouts.
//!
//! # Example
//!
//! ```ignore
//! use rigsync::config::RigConfig;
//!
//! let config = RigConfig::load_or_default();
//! let liveness = config.timeouts.liveness();
//! ```

pub mod timeouts;

pub use timeouts::TimeoutPolicy;

use crate::error::{Result, RigError};
use crate::pipeline::calibration::Calibration;
use crate::types::PeripheralKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "rigsync";

/// Config filename
pub const CONFIG_FILE: &str = "rigsync.toml";

/// Socket base name of the acquisition helper's control link
pub const DEFAULT_DAQ_SOCKET: &str = "rigsync-daq";

/// Socket base name of the preview helper's control link
pub const DEFAULT_SCOPE_SOCKET: &str = "rigsync-scope";

/// Minimum buffered bytes before the acquisition loop issues a read
pub const DEFAULT_MIN_READ_BYTES: usize = 12_288;

/// Voltage above which the frame-marker channel reads as high
pub const DEFAULT_FRAME_THRESHOLD: f64 = 2.5;

// ==================== Config Directory ====================

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the default config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

// ==================== Acquisition ====================

/// Per-channel conversion settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Display name of the channel
    pub name: String,
    /// Physical units after conversion
    pub units: String,
    /// Divisor applied after calibration
    pub gain: f64,
    /// Raw code to volts
    pub calibration: Calibration,
    /// Suffix of the channel's temp file (`<stem>_<suffix>.bin`)
    pub file_suffix: String,
}

impl ChannelConfig {
    pub fn new(name: &str, units: &str, gain: f64, file_suffix: &str) -> Self {
        Self {
            name: name.to_string(),
            units: units.to_string(),
            gain,
            calibration: Calibration::default(),
            file_suffix: file_suffix.to_string(),
        }
    }
}

/// Settings for the analog sampler and its streaming pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Socket base name the helper connects back to
    pub socket_base: String,
    /// Socket base name for the preview helper
    pub scope_socket_base: String,
    /// Whether to launch the preview helper
    pub preview: bool,
    /// Whether the preview helper plots in a window instead of logging
    pub preview_window: bool,
    /// Sampling interval in milliseconds
    pub sample_interval_ms: f64,
    /// Forward every Nth sample to the preview links
    pub preview_decimation: usize,
    /// Minimum buffered bytes before issuing a device read
    pub min_read_bytes: usize,
    /// Voltage cutoff for the frame-marker channel
    pub frame_threshold: f64,
    /// Time units recorded in the output header
    pub time_units: String,
    /// First analog channel
    pub channel_a: ChannelConfig,
    /// Second analog channel
    pub channel_b: ChannelConfig,
    /// Frame-marker channel (gain unused)
    pub frame_channel: ChannelConfig,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            socket_base: DEFAULT_DAQ_SOCKET.to_string(),
            scope_socket_base: DEFAULT_SCOPE_SOCKET.to_string(),
            preview: true,
            preview_window: false,
            sample_interval_ms: 0.02,
            preview_decimation: 4,
            min_read_bytes: DEFAULT_MIN_READ_BYTES,
            frame_threshold: DEFAULT_FRAME_THRESHOLD,
            time_units: "ms".to_string(),
            // V/V with 100x amplifier, reported in mV
            channel_a: ChannelConfig::new("IC", "mV", 100.0e-3, "IC"),
            channel_b: ChannelConfig::new("EC", "mV", 1.0e3, "EC"),
            frame_channel: ChannelConfig::new("FR", "V", 1.0, "FR"),
        }
    }
}

impl AcquisitionConfig {
    /// Check values that would make the pipeline misbehave
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.preview_decimation == 0 {
            return Err("acquisition.preview_decimation must be at least 1".to_string());
        }
        if self.sample_interval_ms <= 0.0 {
            return Err("acquisition.sample_interval_ms must be positive".to_string());
        }
        for channel in [&self.channel_a, &self.channel_b] {
            if channel.gain == 0.0 {
                return Err(format!("gain of channel {} must be non-zero", channel.name));
            }
        }
        Ok(())
    }
}

// ==================== Mirroring ====================

/// Secondary-storage mirror for finished recordings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorConfig {
    /// Root of the local data tree
    pub local_root: PathBuf,
    /// Root of the mirrored tree
    pub remote_root: PathBuf,
}

impl MirrorConfig {
    /// Map a local output path to its mirrored location.
    ///
    /// Paths outside `local_root` land directly under `remote_root`.
    pub fn target_for(&self, path: &Path) -> Option<PathBuf> {
        match path.strip_prefix(&self.local_root) {
            Ok(relative) => Some(self.remote_root.join(relative)),
            Err(_) => path.file_name().map(|name| self.remote_root.join(name)),
        }
    }
}

// ==================== Peripherals ====================

/// How the host launches and watches one peripheral helper
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeripheralSpec {
    /// What the helper controls
    pub kind: PeripheralKind,
    /// Socket base name; the supervisor appends the numeric suffix
    pub socket_base: String,
    /// Program and arguments; the suffix is appended as the final argument
    pub command: Vec<String>,
    /// Extra environment for the helper
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Disabled peripherals are left absent from the session
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Mark the link disconnected when the helper goes silent
    #[serde(default)]
    pub watch_liveness: bool,
}

fn default_true() -> bool {
    true
}

// ==================== Rig Config ====================

/// Complete configuration shared by the host and its helpers
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Bounded waits
    pub timeouts: TimeoutPolicy,
    /// Analog sampler settings
    pub acquisition: AcquisitionConfig,
    /// Optional mirroring of finished recordings
    pub mirror: Option<MirrorConfig>,
    /// Helpers the host spawns
    pub peripherals: Vec<PeripheralSpec>,
}

impl RigConfig {
    /// Load a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RigError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: RigConfig = toml::from_str(&content)
            .map_err(|e| RigError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default location, falling back to defaults
    pub fn load_or_default() -> Self {
        match config_path() {
            Some(path) if path.exists() => match Self::load(&path) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!("Failed to load config from {:?}: {}", path, e);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }

    /// Save the config file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| RigError::Serialization(format!("Failed to serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content).map_err(|e| {
            RigError::Config(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    /// Validate the whole config
    pub fn validate(&self) -> Result<()> {
        self.timeouts.validate().map_err(RigError::Config)?;
        self.acquisition.validate().map_err(RigError::Config)?;
        for spec in &self.peripherals {
            if spec.enabled && spec.command.is_empty() {
                return Err(RigError::Config(format!(
                    "peripheral {} has an empty command",
                    spec.socket_base
                )));
            }
        }
        Ok(())
    }

    /// Enabled peripheral specs
    pub fn enabled_peripherals(&self) -> impl Iterator<Item = &PeripheralSpec> {
        self.peripherals.iter().filter(|p| p.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = RigConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.acquisition.preview_decimation, 4);
        assert_eq!(config.acquisition.min_read_bytes, 12_288);
    }

    #[test]
    fn test_config_round_trip_through_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rig.toml");

        let mut config = RigConfig::default();
        config.timeouts.liveness_ms = 750;
        config.mirror = Some(MirrorConfig {
            local_root: PathBuf::from("/data/local"),
            remote_root: PathBuf::from("/mnt/rack"),
        });
        config.peripherals.push(PeripheralSpec {
            kind: PeripheralKind::Lick,
            socket_base: "licksocket".into(),
            command: vec!["lick-helper".into()],
            env: BTreeMap::new(),
            enabled: true,
            watch_liveness: true,
        });
        config.save(&path).unwrap();

        let loaded = RigConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_empty_command_rejected() {
        let mut config = RigConfig::default();
        config.peripherals.push(PeripheralSpec {
            kind: PeripheralKind::Camera,
            socket_base: "fwsocket".into(),
            command: Vec::new(),
            env: BTreeMap::new(),
            enabled: true,
            watch_liveness: false,
        });
        assert!(matches!(config.validate(), Err(RigError::Config(_))));
    }

    #[test]
    fn test_zero_decimation_rejected() {
        let mut config = RigConfig::default();
        config.acquisition.preview_decimation = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mirror_target_keeps_relative_layout() {
        let mirror = MirrorConfig {
            local_root: PathBuf::from("/data/local"),
            remote_root: PathBuf::from("/mnt/rack"),
        };
        assert_eq!(
            mirror.target_for(Path::new("/data/local/2026/s_0001.rec")),
            Some(PathBuf::from("/mnt/rack/2026/s_0001.rec"))
        );
        assert_eq!(
            mirror.target_for(Path::new("/tmp/other.rec")),
            Some(PathBuf::from("/mnt/rack/other.rec"))
        );
    }
}
