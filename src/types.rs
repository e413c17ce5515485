//! Core types shared across the host and the helper processes

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// The kind of device a peripheral helper controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeripheralKind {
    /// Optical motion sensor streaming `(t, dt, y, x)` records
    Motion,
    /// Camera streaming frame timestamps
    Camera,
    /// Lick sensor streaming `(t, amplitude)` records
    Lick,
    /// Image sensor streaming signed byte samples
    ImageSensor,
    /// Multi-channel analog sampler
    Acquisition,
    /// Reward pump / valve controller (control messages only)
    Reward,
    /// Live preview of the acquisition channels
    Preview,
}

impl PeripheralKind {
    /// Display name for the kind
    pub fn display_name(&self) -> &'static str {
        match self {
            PeripheralKind::Motion => "Motion sensor",
            PeripheralKind::Camera => "Camera",
            PeripheralKind::Lick => "Lick sensor",
            PeripheralKind::ImageSensor => "Image sensor",
            PeripheralKind::Acquisition => "Analog acquisition",
            PeripheralKind::Reward => "Reward controller",
            PeripheralKind::Preview => "Acquisition preview",
        }
    }
}

impl std::fmt::Display for PeripheralKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Liveness state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    /// Accepted, handshake not yet complete
    #[default]
    Handshaking,
    /// Steady-state non-blocking polling
    Connected,
    /// Liveness timeout or peer closed; terminal for this peripheral
    Disconnected,
    /// Shut down by its owner
    Closed,
}

impl ConnectionStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Handshaking => write!(f, "Handshaking..."),
            ConnectionStatus::Connected => write!(f, "Connected"),
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
            ConnectionStatus::Closed => write!(f, "Closed"),
        }
    }
}

/// Counters kept by the streaming acquisition loop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AcquisitionStats {
    /// Device reads issued
    pub reads: u64,
    /// Bytes returned by the device
    pub bytes_read: u64,
    /// Complete scans decoded
    pub scans: u64,
    /// Reads that failed and were skipped
    pub failed_reads: u64,
    /// Times the hardware buffer was found more than half full
    pub overrun_warnings: u64,
    /// Preview payloads dropped because a preview link was busy or gone
    pub preview_drops: u64,
}

impl AcquisitionStats {
    /// Average bytes per successful read
    pub fn avg_read_bytes(&self) -> f64 {
        if self.reads == 0 {
            0.0
        } else {
            self.bytes_read as f64 / self.reads as f64
        }
    }
}

/// Wall-clock seconds since the UNIX epoch.
///
/// This is the clock carried in motion records and acquisition timestamps.
pub fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
