//! # rigsync: synchronized multi-peripheral experiment sessions
//!
//! A host process supervises a set of peripheral helper processes (motion
//! sensors, camera, lick detector, analog acquisition, ...) over local
//! sockets, streams their binary feeds every tick, and coordinates recording
//! sessions across them.
//!
//! ## Architecture
//!
//! - **Supervisor**: Spawns helpers, finds free socket names, runs the handshake
//! - **Link**: One framed-by-convention socket with heartbeat and liveness
//! - **Wire**: Fixed-stride little-endian records and incremental decoding
//! - **Pipeline**: Acquisition device drain, conversion, temp files, consolidation
//! - **Session**: Host-side session context and the helpers' state machine
//! - **Backend**: The acquisition and preview helper processes
//! - **Frontend**: Optional egui_plot window for the preview helper
//!
//! ## Configuration
//!
//! Host and helpers read the same TOML file (see [`config::RigConfig`]); the
//! default location is the platform config directory under `rigsync/`.
//!
//! ## Example
//!
//! ```ignore
//! use rigsync::{config::RigConfig, session::SessionContext};
//!
//! let config = RigConfig::load_or_default();
//! let mut ctx = SessionContext::spawn_all(&config, "/data/today/");
//! let handle = ctx.start_session("/data/today/session_0001.rec")?;
//! for _ in 0..600 {
//!     let tick = ctx.tick();
//!     // feed tick.motion, tick.licks, ... to the task
//!     std::thread::sleep(std::time::Duration::from_millis(16));
//! }
//! ctx.stop_session(&handle)?;
//! ctx.teardown();
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod frontend;
pub mod link;
pub mod pipeline;
pub mod session;
pub mod supervisor;
pub mod types;
pub mod wire;

// Re-export commonly used types
pub use config::{RigConfig, TimeoutPolicy};
pub use error::{Result, ResultExt, RigError};
pub use link::{ControlMessage, Link, SocketName};
pub use session::{SessionContext, SessionState};
pub use supervisor::{Peripheral, Supervisor};
pub use types::{ConnectionStatus, PeripheralKind};
