//! Session control
//!
//! A session is one recording: the host sends `begin <name> end` to every
//! recording peripheral, collects the acquisition helper's start timestamp,
//! and later sends `stop` and collects the stop timestamp.
//!
//! - [`SessionMachine`] - Per-helper state machine driven by control payloads
//! - [`SessionContext`] - Host-side owner of all peripherals and the session
//! - [`SessionHeader`] - JSON sidecar written next to the session output

pub mod host;
pub mod machine;
pub mod types;

pub use host::{session_output, FeedSlot, SessionContext, TickReport};
pub use machine::{SessionAction, SessionMachine};
pub use types::{SessionHandle, SessionHeader, SessionState};
