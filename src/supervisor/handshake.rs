//! The startup exchange that takes a fresh link to steady state.
//!
//! Parent: send the context payload, wait for `"ready"`.
//! Child: connect back, read the context payload, reply `"ready"`.
//! Both sides then switch the link to non-blocking mode.

use crate::error::{Result, RigError};
use crate::link::control::{self, ControlMessage};
use crate::link::{Link, SocketName};
use std::time::Duration;

/// Parent side of the handshake.
///
/// Returns immediately if the link already completed a handshake, so a
/// repeated call never waits on a `"ready"` that will not come again.
pub fn handshake(link: &mut Link, context: &str, timeout: Duration) -> Result<()> {
    if link.is_ready() {
        return Ok(());
    }
    if context.is_empty() {
        return Err(RigError::Config(format!(
            "empty handshake context for {}",
            link.name()
        )));
    }

    link.send_raw(context.as_bytes(), timeout)
        .map_err(|e| e.with_context(format!("sending handshake context to {}", link.name())))?;

    match link.recv_until(timeout, |buf| control::latin1(buf).contains(control::READY)) {
        Ok(buf) => {
            // The peer may already be streaming behind its reply
            if let Some(at) = control::find_token(&buf, control::READY) {
                link.unread(&buf[at + control::READY.len()..]);
            }
            link.mark_ready()?;
            tracing::info!(socket = %link.name(), "Handshake complete");
            Ok(())
        }
        Err(e) => {
            tracing::error!(socket = %link.name(), "No ready reply: {}", e);
            Err(RigError::HandshakeTimeout {
                name: link.name().to_string(),
                waited: timeout,
            })
        }
    }
}

/// Child side: wait for the context payload, reply `"ready"`.
pub fn accept_context(link: &mut Link, timeout: Duration) -> Result<String> {
    let payload = link
        .recv_until(timeout, |buf| !buf.is_empty())
        .map_err(|_| RigError::HandshakeTimeout {
            name: link.name().to_string(),
            waited: timeout,
        })?;
    let context = control::latin1(&payload);
    link.send_control(&ControlMessage::Ready, timeout)?;
    link.mark_ready()?;
    tracing::debug!(socket = %link.name(), context = %context, "Replied ready");
    Ok(context)
}

/// Child side: connect to `base` + `suffix` and complete the handshake.
pub fn connect_back(
    base: &str,
    suffix: u32,
    connect_timeout: Duration,
    handshake_timeout: Duration,
) -> Result<(Link, String)> {
    let name = SocketName::new(base, suffix);
    let mut link = Link::connect(&name, connect_timeout)?;
    let context = accept_context(&mut link, handshake_timeout)?;
    Ok((link, context))
}
