//! Local socket names.
//!
//! A link address is a base name plus a numeric suffix. On Linux it lives in
//! the abstract socket namespace, so nothing appears on the filesystem and
//! names vanish with their last holder. Elsewhere a socket file under the
//! temp directory is used.

use std::io;
use std::os::unix::net::{UnixListener, UnixStream};

/// `base` + `suffix`, e.g. `rigsync-daq0`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SocketName {
    base: String,
    suffix: u32,
}

impl SocketName {
    /// Create a name. A leading NUL in `base` (the abstract-namespace marker
    /// some callers spell out) is dropped.
    pub fn new(base: &str, suffix: u32) -> Self {
        Self {
            base: base.trim_start_matches('\0').to_string(),
            suffix,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn suffix(&self) -> u32 {
        self.suffix
    }

    /// The same base with the next suffix
    pub fn next(&self) -> Self {
        Self {
            base: self.base.clone(),
            suffix: self.suffix + 1,
        }
    }

    /// Bind a listener on this name
    pub fn bind(&self) -> io::Result<UnixListener> {
        #[cfg(target_os = "linux")]
        {
            use std::os::linux::net::SocketAddrExt;
            let addr = std::os::unix::net::SocketAddr::from_abstract_name(self.to_string())?;
            UnixListener::bind_addr(&addr)
        }
        #[cfg(not(target_os = "linux"))]
        {
            UnixListener::bind(self.fs_path())
        }
    }

    /// Connect to a listener bound on this name
    pub fn connect(&self) -> io::Result<UnixStream> {
        #[cfg(target_os = "linux")]
        {
            use std::os::linux::net::SocketAddrExt;
            let addr = std::os::unix::net::SocketAddr::from_abstract_name(self.to_string())?;
            UnixStream::connect_addr(&addr)
        }
        #[cfg(not(target_os = "linux"))]
        {
            UnixStream::connect(self.fs_path())
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn fs_path(&self) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{}.sock", self))
    }
}

impl std::fmt::Display for SocketName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.base, self.suffix)
    }
}
