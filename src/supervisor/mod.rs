//! Process supervisor: bind, launch, accept, handshake
//!
//! [`Supervisor::spawn`] binds a socket named `base` + suffix, trying the next
//! suffix whenever a name is already taken (stale names from an earlier
//! session), launches the helper with that suffix as its final argument and
//! accepts exactly one connection within the configured accept timeout.
//!
//! # Example
//!
//! ```ignore
//! use rigsync::supervisor::{Supervisor, SpawnOptions};
//!
//! let supervisor = Supervisor::new(config.timeouts.clone());
//! let mut lick = supervisor.spawn_and_handshake(
//!     PeripheralKind::Lick,
//!     "licksocket",
//!     &["lick-helper".to_string()],
//!     "/data/2026/",
//!     &SpawnOptions::default(),
//! )?;
//! lick.link_mut().heartbeat();
//! ```

pub mod handshake;

pub use handshake::{accept_context, connect_back, handshake};

use crate::config::TimeoutPolicy;
use crate::error::{Result, RigError};
use crate::link::{Link, LinkRole, SocketName};
use crate::types::PeripheralKind;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::os::unix::net::{UnixListener, UnixStream};
use std::process::{Child, Command};
use std::time::{Duration, Instant};

/// Suffixes tried before giving up on a base name
pub const DEFAULT_BIND_ATTEMPTS: u32 = 64;

/// How a helper is launched
#[derive(Debug, Clone)]
pub struct SpawnOptions {
    /// Variables set on top of the inherited environment
    pub env: BTreeMap<String, String>,
    /// Launch `argv`; when false only bind and accept (the peer is already
    /// running and connects under a known suffix)
    pub launch: bool,
    /// Bind exactly this suffix instead of searching
    pub suffix: Option<u32>,
}

impl Default for SpawnOptions {
    fn default() -> Self {
        Self {
            env: BTreeMap::new(),
            launch: true,
            suffix: None,
        }
    }
}

impl SpawnOptions {
    /// Accept on a fixed suffix without launching anything
    pub fn attach(suffix: u32) -> Self {
        Self {
            env: BTreeMap::new(),
            launch: false,
            suffix: Some(suffix),
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }
}

/// A launched (or attached) helper and its link
#[derive(Debug)]
pub struct Peripheral {
    kind: PeripheralKind,
    link: Link,
    child: Option<Child>,
}

impl Peripheral {
    pub fn kind(&self) -> PeripheralKind {
        self.kind
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    /// OS process id of the launched helper
    pub fn child_id(&self) -> Option<u32> {
        self.child.as_ref().map(|c| c.id())
    }

    /// Whether the launched helper is still running
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Quit/close handshake, then terminate the helper if it is still
    /// running after `timeout`. Returns whether the helper acknowledged.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        let acknowledged = self.link.close(timeout);
        if let Some(mut child) = self.child.take() {
            reap(&mut child, self.kind, timeout);
        }
        acknowledged
    }
}

impl Drop for Peripheral {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if matches!(child.try_wait(), Ok(None)) {
                tracing::warn!("{} helper still running on drop, killing it", self.kind);
                let _ = child.kill();
                let _ = child.wait();
            }
        }
    }
}

/// Wait up to `timeout` for `child` to exit, then kill it.
fn reap(child: &mut Child, kind: PeripheralKind, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                tracing::debug!("{} helper exited with {}", kind, status);
                return;
            }
            Ok(None) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(None) => {
                tracing::warn!("{} helper did not exit, killing it", kind);
                if let Err(e) = child.kill() {
                    tracing::error!("Failed to kill {} helper: {}", kind, e);
                }
                let _ = child.wait();
                return;
            }
            Err(e) => {
                tracing::error!("Failed to query {} helper: {}", kind, e);
                return;
            }
        }
    }
}

/// Spawns helpers and hands back handshaken links
#[derive(Debug, Clone)]
pub struct Supervisor {
    policy: TimeoutPolicy,
    max_attempts: u32,
}

impl Supervisor {
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self {
            policy,
            max_attempts: DEFAULT_BIND_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    /// Bind `base` + the first free suffix, or exactly `fixed`.
    pub fn bind(&self, base: &str, fixed: Option<u32>) -> Result<(SocketName, UnixListener)> {
        if let Some(suffix) = fixed {
            let name = SocketName::new(base, suffix);
            return name
                .bind()
                .map(|listener| (name.clone(), listener))
                .map_err(|source| RigError::Connect {
                    name: name.to_string(),
                    source,
                });
        }

        let mut name = SocketName::new(base, 0);
        for _ in 0..self.max_attempts {
            match name.bind() {
                Ok(listener) => {
                    tracing::debug!(socket = %name, "Bound");
                    return Ok((name, listener));
                }
                Err(e) => {
                    tracing::debug!(socket = %name, "Name taken ({}), trying next suffix", e);
                    name = name.next();
                }
            }
        }
        Err(RigError::BindExhausted {
            base: base.to_string(),
            attempts: self.max_attempts,
        })
    }

    /// Bind, launch `argv` with the suffix appended, accept one connection.
    ///
    /// The returned link has not been handshaken yet.
    pub fn spawn(
        &self,
        kind: PeripheralKind,
        base: &str,
        argv: &[String],
        options: &SpawnOptions,
    ) -> Result<Peripheral> {
        let (name, listener) = self.bind(base, options.suffix)?;

        let mut child = if options.launch {
            Some(self.launch(&name, argv, options)?)
        } else {
            None
        };

        match self.accept(&name, &listener, child.as_mut()) {
            Ok(stream) => {
                let link = Link::new(name, stream, LinkRole::Owner)?;
                Ok(Peripheral { kind, link, child })
            }
            Err(e) => {
                if let Some(mut child) = child {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                Err(e)
            }
        }
    }

    /// [`Supervisor::spawn`] followed by the parent side of the handshake.
    pub fn spawn_and_handshake(
        &self,
        kind: PeripheralKind,
        base: &str,
        argv: &[String],
        context: &str,
        options: &SpawnOptions,
    ) -> Result<Peripheral> {
        let mut peripheral = self.spawn(kind, base, argv, options)?;
        handshake(&mut peripheral.link, context, self.policy.handshake())?;
        Ok(peripheral)
    }

    /// Bind `base` + exactly `suffix`, accept an already running peer and
    /// handshake. Used for extra links to a helper launched earlier under
    /// the same suffix.
    pub fn attach(&self, base: &str, suffix: u32, context: &str) -> Result<Link> {
        let (name, listener) = self.bind(base, Some(suffix))?;
        let stream = self.accept(&name, &listener, None)?;
        let mut link = Link::new(name, stream, LinkRole::Owner)?;
        handshake(&mut link, context, self.policy.handshake())?;
        Ok(link)
    }

    fn launch(&self, name: &SocketName, argv: &[String], options: &SpawnOptions) -> Result<Child> {
        let Some((program, args)) = argv.split_first() else {
            return Err(RigError::Config(format!("empty command for {}", name)));
        };
        tracing::info!(socket = %name, "Launching {} {:?} {}", program, args, name.suffix());
        Command::new(program)
            .args(args)
            .arg(name.suffix().to_string())
            .envs(&options.env)
            .spawn()
            .map_err(|source| RigError::Spawn {
                program: program.clone(),
                source,
            })
    }

    fn accept(
        &self,
        name: &SocketName,
        listener: &UnixListener,
        mut child: Option<&mut Child>,
    ) -> Result<UnixStream> {
        listener.set_nonblocking(true)?;
        let timeout = self.policy.accept();
        let deadline = Instant::now() + timeout;
        loop {
            match listener.accept() {
                Ok((stream, _)) => {
                    tracing::debug!(socket = %name, "Accepted");
                    return Ok(stream);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(RigError::Connect {
                        name: name.to_string(),
                        source,
                    })
                }
            }

            if let Some(child) = child.as_deref_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(RigError::Spawn {
                        program: name.to_string(),
                        source: std::io::Error::other(format!(
                            "helper exited with {} before connecting",
                            status
                        )),
                    });
                }
            }

            if Instant::now() >= deadline {
                tracing::error!(socket = %name, "No connection within {:?}", timeout);
                return Err(RigError::AcceptTimeout {
                    name: name.to_string(),
                    waited: timeout,
                });
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
}
