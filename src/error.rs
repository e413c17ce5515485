//! Error handling for rigsync
//!
//! This module defines the crate-wide error type and a Result alias. The
//! variants follow the failure taxonomy of the session layer: some kinds are
//! expected in steady state and are swallowed by callers (see
//! [`RigError::is_transient`]), others abort only the peripheral they belong
//! to, and consolidation failures are always surfaced.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::link::control::ControlError;

/// Main error type for rigsync operations
#[derive(Error, Debug)]
pub enum RigError {
    /// Binding or connecting a local socket name failed
    #[error("Connect error on socket {name}: {source}")]
    Connect {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Every suffix tried for a socket base name was already bound
    #[error("No free socket name for base {base} after {attempts} attempts")]
    BindExhausted { base: String, attempts: u32 },

    /// The spawned child never connected back
    #[error("No connection on socket {name} within {waited:?}")]
    AcceptTimeout { name: String, waited: Duration },

    /// The peer connected but never replied "ready"
    #[error("Handshake with {name} timed out after {waited:?}")]
    HandshakeTimeout { name: String, waited: Duration },

    /// Launching a helper process failed
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A send could not complete in time; retried on the next poll
    #[error("Transient send failure on {0}")]
    TransientSend(String),

    /// A receive returned no usable data; expected in non-blocking mode
    #[error("Transient receive failure on {0}")]
    TransientReceive(String),

    /// The peer has been silent for longer than the liveness timeout
    #[error("Liveness timeout on {name} after {silent_for:?}")]
    LivenessTimeout { name: String, silent_for: Duration },

    /// A control payload could not be interpreted
    #[error("Control message error: {0}")]
    Control(#[from] ControlError),

    /// Errors reported by the acquisition device
    #[error("Device error: {0}")]
    Device(String),

    /// Writing or rebuilding the consolidated recording failed
    #[error("Consolidation of {path} failed: {message}")]
    Consolidation { path: PathBuf, message: String },

    /// The preview window could not be opened or failed while running
    #[error("Preview window error: {0}")]
    Preview(String),

    /// A session operation was called in the wrong state
    #[error("Session error: {0}")]
    Session(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RigError>,
    },
}

impl RigError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        RigError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this failure is part of normal non-blocking operation and
    /// should be retried on the next poll instead of escalated.
    pub fn is_transient(&self) -> bool {
        match self {
            RigError::TransientSend(_) | RigError::TransientReceive(_) => true,
            RigError::Connect { .. } => true,
            RigError::WithContext { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Whether this failure disables only the peripheral it came from.
    pub fn is_peripheral_fatal(&self) -> bool {
        match self {
            RigError::AcceptTimeout { .. }
            | RigError::HandshakeTimeout { .. }
            | RigError::Spawn { .. }
            | RigError::BindExhausted { .. }
            | RigError::LivenessTimeout { .. }
            | RigError::Device(_) => true,
            RigError::WithContext { source, .. } => source.is_peripheral_fatal(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RigError {
    fn from(err: serde_json::Error) -> Self {
        RigError::Serialization(err.to_string())
    }
}

/// Result type alias for rigsync operations
pub type Result<T> = std::result::Result<T, RigError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| RigError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| RigError::Io(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RigError::Device("subdevice busy".to_string());
        assert_eq!(err.to_string(), "Device error: subdevice busy");
    }

    #[test]
    fn test_error_with_context() {
        let err = RigError::Config("bad gain".to_string());
        let with_ctx = err.with_context("Failed to load acquisition settings");
        assert!(with_ctx
            .to_string()
            .contains("Failed to load acquisition settings"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(RigError::TransientSend("lick".into()).is_transient());
        assert!(RigError::TransientReceive("lick".into())
            .with_context("poll")
            .is_transient());
        assert!(!RigError::Device("gone".into()).is_transient());
    }

    #[test]
    fn test_handshake_timeout_only_disables_peripheral() {
        let err = RigError::HandshakeTimeout {
            name: "licksocket0".into(),
            waited: Duration::from_secs(5),
        };
        assert!(err.is_peripheral_fatal());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("licksocket0"));
    }

    #[test]
    fn test_consolidation_error_names_path() {
        let err = RigError::Consolidation {
            path: PathBuf::from("/data/session_0001.rec"),
            message: "disk full".into(),
        };
        assert!(err.to_string().contains("session_0001.rec"));
        assert!(!err.is_peripheral_fatal());
    }
}
