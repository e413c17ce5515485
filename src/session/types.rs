//! Session data types

use crate::error::{Result, ResultExt};
use crate::types::PeripheralKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// State of one recording episode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SessionState {
    /// No active session
    #[default]
    Idle,
    /// Acquisition armed, start acknowledged
    Primed,
    /// Steady-state streaming
    Recording,
    /// Final drain and consolidation
    Stopping,
}

impl SessionState {
    /// Check if currently recording
    pub fn is_recording(&self) -> bool {
        matches!(self, SessionState::Recording)
    }

    /// Whether a session exists in any form
    pub fn is_active(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }

    /// Display name for the state
    pub fn display_name(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Primed => "Primed",
            SessionState::Recording => "Recording",
            SessionState::Stopping => "Stopping",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A running session, returned by `start_session`
#[derive(Debug, Clone, PartialEq)]
pub struct SessionHandle {
    /// Output path sent in `begin<path>end`
    pub output: PathBuf,
    /// First-sample time reported by the acquisition helper
    pub acquisition_start: Option<f64>,
    /// When the host started the session
    pub started: DateTime<Utc>,
    /// Peripherals that were told to record
    pub participants: Vec<PeripheralKind>,
}

/// Written next to the output when a session stops
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionHeader {
    pub output: PathBuf,
    pub acquisition_start: Option<f64>,
    pub acquisition_stop: Option<f64>,
    pub started: DateTime<Utc>,
    pub stopped: DateTime<Utc>,
    pub participants: Vec<PeripheralKind>,
}

impl SessionHeader {
    /// `<stem>_session.json`
    pub fn path_for(output: &Path) -> PathBuf {
        crate::pipeline::temp_path(&crate::pipeline::output_stem(output), "session")
            .with_extension("json")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Ok(serde_json::from_str(&json)?)
    }
}
