//! Links: one local socket connection between an owner and one peripheral
//!
//! A [`Link`] wraps a connected Unix stream and carries everything the
//! session layer needs to treat it as a non-blocking, possibly-dead channel:
//!
//! - **Polling**: [`Link::poll`] performs one non-blocking receive;
//!   [`Link::drain`] receives until the socket would block. No data is the
//!   normal steady state, not an error.
//! - **Heartbeat**: [`Link::heartbeat`] is a best-effort single-byte send.
//! - **Liveness**: when enabled, a link silent for longer than its liveness
//!   timeout is marked [`ConnectionStatus::Disconnected`]. Any received
//!   payload counts as a sign of life. Disconnection is terminal for the
//!   link but it can still be polled.
//! - **Teardown**: the owner sends `"quit"`, waits a bounded time for
//!   `"close"`, and shuts the socket down either way.
//!
//! Each link has exactly one reader and one writer; it is never shared
//! between processes or threads.
//!
//! Bytes read past the end of a bounded wait can be handed back with
//! [`Link::unread`]; the next receive returns them first.
//!
//! Best-effort payloads are never cut mid-record: if the kernel accepts only
//! part of one, the tail is kept and flushed before anything else is sent,
//! and new payloads are dropped whole while a tail is pending.

pub mod address;
pub mod control;

pub use address::SocketName;
pub use control::{ControlError, ControlMessage};

use crate::error::{Result, RigError};
use crate::types::ConnectionStatus;
use crate::wire::{drain_nonblocking, Drained};
use std::io::{ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

/// Largest single receive in [`Link::poll`]
pub const POLL_CHUNK: usize = 4096;

/// Unsent tail size above which the peer is reported as not reading.
/// The tail itself is never truncated.
pub const MAX_PENDING_BYTES: usize = 1 << 20;

/// Sleep between attempts inside bounded waits
const RETRY_SLEEP: Duration = Duration::from_millis(1);

/// Which end of the link this is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Bound the socket, launched the peer, drives teardown
    Owner,
    /// Connected back to the owner
    Peer,
}

/// A connection to one peer process
#[derive(Debug)]
pub struct Link {
    name: SocketName,
    stream: UnixStream,
    role: LinkRole,
    status: ConnectionStatus,
    blocking: bool,
    ready: bool,
    liveness: Option<Duration>,
    last_receive: Instant,
    disconnected_at: Option<Instant>,
    pending: Vec<u8>,
    unread: Vec<u8>,
}

impl Link {
    /// Wrap a freshly connected stream. The link starts in blocking mode
    /// until the handshake completes.
    pub fn new(name: SocketName, stream: UnixStream, role: LinkRole) -> Result<Self> {
        stream.set_nonblocking(false)?;
        Ok(Self {
            name,
            stream,
            role,
            status: ConnectionStatus::Handshaking,
            blocking: true,
            ready: false,
            liveness: None,
            last_receive: Instant::now(),
            disconnected_at: None,
            pending: Vec::new(),
            unread: Vec::new(),
        })
    }

    /// Peer side: connect back to `name`, retrying until the owner has bound
    /// it or `timeout` elapses.
    pub fn connect(name: &SocketName, timeout: Duration) -> Result<Self> {
        let deadline = Instant::now() + timeout;
        loop {
            match name.connect() {
                Ok(stream) => {
                    tracing::debug!(socket = %name, "Connected back to owner");
                    return Link::new(name.clone(), stream, LinkRole::Peer);
                }
                Err(e) if Instant::now() < deadline => {
                    tracing::trace!(socket = %name, "Connect failed ({}), retrying", e);
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    return Err(RigError::Connect {
                        name: name.to_string(),
                        source: e,
                    })
                }
            }
        }
    }

    pub fn name(&self) -> &SocketName {
        &self.name
    }

    pub fn role(&self) -> LinkRole {
        self.role
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Whether the handshake has completed
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn is_connected(&self) -> bool {
        self.status.is_usable()
    }

    /// Time of the last successful receive
    pub fn last_receive(&self) -> Instant {
        self.last_receive
    }

    /// When the link was marked disconnected
    pub fn disconnected_at(&self) -> Option<Instant> {
        self.disconnected_at
    }

    /// Enable or disable liveness watching
    pub fn set_liveness(&mut self, timeout: Option<Duration>) {
        self.liveness = timeout;
        self.last_receive = Instant::now();
    }

    pub fn liveness(&self) -> Option<Duration> {
        self.liveness
    }

    /// Switch between blocking and non-blocking mode
    pub fn set_blocking(&mut self, blocking: bool) -> Result<()> {
        self.stream.set_nonblocking(!blocking)?;
        self.blocking = blocking;
        Ok(())
    }

    /// Record a completed handshake and enter non-blocking steady state.
    pub fn mark_ready(&mut self) -> Result<()> {
        self.set_blocking(false)?;
        self.ready = true;
        self.status = ConnectionStatus::Connected;
        self.last_receive = Instant::now();
        Ok(())
    }

    // ==================== Sending ====================

    /// Best-effort single-byte heartbeat. A failure is retried on the next
    /// call, never escalated.
    pub fn heartbeat(&mut self) -> bool {
        self.offer(control::HEARTBEAT.as_bytes())
    }

    /// Best-effort send that never blocks and never splits a payload.
    ///
    /// Returns `false` if the payload was dropped.
    pub fn offer(&mut self, payload: &[u8]) -> bool {
        if self.status == ConnectionStatus::Closed {
            return false;
        }
        if !self.flush_pending() {
            tracing::trace!(socket = %self.name, "Dropping {} bytes, tail pending", payload.len());
            return false;
        }
        match self.write_nonblocking(payload) {
            Ok(n) if n == payload.len() => true,
            Ok(n) => {
                // Kernel took part of it; the rest goes out before anything else
                self.pending.extend_from_slice(&payload[n..]);
                true
            }
            Err(e) => {
                tracing::debug!(socket = %self.name, "Send failed, will retry: {}", e);
                false
            }
        }
    }

    /// Try to send the unsent tail. Returns `true` once nothing is pending.
    pub fn flush_pending(&mut self) -> bool {
        if self.pending.is_empty() {
            return true;
        }
        let pending = std::mem::take(&mut self.pending);
        match self.write_nonblocking(&pending) {
            Ok(n) => self.pending = pending[n..].to_vec(),
            Err(_) => self.pending = pending,
        }
        if self.pending.len() > MAX_PENDING_BYTES {
            tracing::warn!(socket = %self.name, "Pending tail exceeds limit, peer not reading");
        }
        self.pending.is_empty()
    }

    /// Bytes accepted by [`Link::offer`] but not yet sent
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Send a control message, retrying for at most `timeout`.
    pub fn send_control(&mut self, message: &ControlMessage, timeout: Duration) -> Result<()> {
        self.send_raw(message.to_payload().as_bytes(), timeout)
    }

    /// Send a complete payload, retrying for at most `timeout`. On timeout
    /// the unsent remainder is queued so the stream stays consistent.
    pub fn send_raw(&mut self, payload: &[u8], timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while !self.flush_pending() {
            if Instant::now() >= deadline {
                return Err(RigError::TransientSend(self.name.to_string()));
            }
            std::thread::sleep(RETRY_SLEEP);
        }

        let mut sent = 0;
        while sent < payload.len() {
            match self.write_nonblocking(&payload[sent..]) {
                Ok(n) => sent += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => {
                    tracing::debug!(socket = %self.name, "Send error: {}", e);
                    return Err(RigError::TransientSend(self.name.to_string()));
                }
            }
            if sent < payload.len() {
                if Instant::now() >= deadline {
                    if sent > 0 {
                        self.pending.extend_from_slice(&payload[sent..]);
                    }
                    return Err(RigError::TransientSend(self.name.to_string()));
                }
                std::thread::sleep(RETRY_SLEEP);
            }
        }
        Ok(())
    }

    /// Send an `f64` timestamp (8 bytes, little-endian).
    pub fn send_timestamp(&mut self, secs: f64, timeout: Duration) -> Result<()> {
        self.send_raw(&secs.to_le_bytes(), timeout)
    }

    fn write_nonblocking(&mut self, bytes: &[u8]) -> std::io::Result<usize> {
        if self.blocking {
            self.stream.set_nonblocking(true)?;
            let result = self.stream.write(bytes);
            self.stream.set_nonblocking(false)?;
            result
        } else {
            self.stream.write(bytes)
        }
    }

    // ==================== Receiving ====================

    /// Hand bytes back to the link. They are returned, ahead of anything
    /// still in the socket, by the next receive.
    pub fn unread(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut restored = bytes.to_vec();
        restored.append(&mut self.unread);
        self.unread = restored;
    }

    /// Bytes handed back by [`Link::unread`] and not yet received
    pub fn unread_len(&self) -> usize {
        self.unread.len()
    }

    /// One non-blocking receive. `None` means nothing arrived.
    pub fn poll(&mut self) -> Option<Vec<u8>> {
        if !self.unread.is_empty() {
            self.check_liveness(Instant::now());
            return Some(std::mem::take(&mut self.unread));
        }
        let mut buf = [0u8; POLL_CHUNK];
        let received = match self.read_nonblocking(&mut buf) {
            Ok(0) => {
                self.peer_closed();
                None
            }
            Ok(n) => {
                self.mark_alive();
                Some(buf[..n].to_vec())
            }
            Err(e) => {
                if e.kind() != ErrorKind::WouldBlock {
                    tracing::trace!(socket = %self.name, "Receive failed: {}", e);
                }
                None
            }
        };
        self.check_liveness(Instant::now());
        received
    }

    /// Poll and interpret the payload as a control message.
    pub fn poll_control(&mut self) -> Option<std::result::Result<ControlMessage, ControlError>> {
        self.poll().map(|bytes| ControlMessage::parse_bytes(&bytes))
    }

    /// Receive until the socket would block.
    pub fn drain(&mut self) -> Drained {
        let mut drained = if self.blocking {
            let result = self
                .stream
                .set_nonblocking(true)
                .map(|_| drain_nonblocking(&mut self.stream));
            let _ = self.stream.set_nonblocking(false);
            result.unwrap_or_default()
        } else {
            drain_nonblocking(&mut self.stream)
        };
        if !self.unread.is_empty() {
            let mut bytes = std::mem::take(&mut self.unread);
            bytes.append(&mut drained.bytes);
            drained.bytes = bytes;
        }

        if !drained.bytes.is_empty() {
            self.mark_alive();
        }
        if drained.peer_closed {
            self.peer_closed();
        }
        self.check_liveness(Instant::now());
        drained
    }

    /// Accumulate received bytes until `done` accepts the buffer or
    /// `timeout` elapses.
    pub fn recv_until<F>(&mut self, timeout: Duration, mut done: F) -> Result<Vec<u8>>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut buffer = std::mem::take(&mut self.unread);
        if !buffer.is_empty() && done(&buffer) {
            return Ok(buffer);
        }
        let mut chunk = [0u8; POLL_CHUNK];
        loop {
            match self.read_nonblocking(&mut chunk) {
                Ok(0) => {
                    self.peer_closed();
                    return Err(RigError::TransientReceive(format!(
                        "{} closed by peer",
                        self.name
                    )));
                }
                Ok(n) => {
                    self.mark_alive();
                    buffer.extend_from_slice(&chunk[..n]);
                    if done(&buffer) {
                        return Ok(buffer);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::trace!(socket = %self.name, "Receive failed: {}", e);
                }
            }
            if Instant::now() >= deadline {
                return Err(RigError::Timeout(format!(
                    "{} after {:?} ({} bytes received)",
                    self.name,
                    timeout,
                    buffer.len()
                )));
            }
            std::thread::sleep(RETRY_SLEEP);
        }
    }

    fn read_nonblocking(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.blocking {
            self.stream.set_nonblocking(true)?;
            let result = self.stream.read(buf);
            self.stream.set_nonblocking(false)?;
            result
        } else {
            self.stream.read(buf)
        }
    }

    // ==================== Liveness ====================

    fn mark_alive(&mut self) {
        self.last_receive = Instant::now();
    }

    fn peer_closed(&mut self) {
        if self.status == ConnectionStatus::Connected {
            tracing::warn!(socket = %self.name, "Peer closed the link");
            self.status = ConnectionStatus::Disconnected;
            self.disconnected_at = Some(Instant::now());
        }
    }

    /// Apply the liveness rule. Returns `true` if the link just became
    /// disconnected.
    pub fn check_liveness(&mut self, now: Instant) -> bool {
        let Some(timeout) = self.liveness else {
            return false;
        };
        if self.status != ConnectionStatus::Connected {
            return false;
        }
        let silent_for = now.saturating_duration_since(self.last_receive);
        if silent_for > timeout {
            tracing::warn!(
                socket = %self.name,
                "{}",
                RigError::LivenessTimeout {
                    name: self.name.to_string(),
                    silent_for,
                }
            );
            self.status = ConnectionStatus::Disconnected;
            self.disconnected_at = Some(now);
            return true;
        }
        false
    }

    // ==================== Teardown ====================

    /// Owner teardown: send `"quit"`, wait up to `timeout` for `"close"`,
    /// then shut the socket down regardless. Returns whether the peer
    /// acknowledged.
    pub fn close(&mut self, timeout: Duration) -> bool {
        if self.status == ConnectionStatus::Closed {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let acknowledged = match self.send_control(&ControlMessage::Quit, timeout) {
            Ok(()) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                self.recv_until(remaining, |buf| {
                    control::latin1(buf).contains(control::CLOSE)
                })
                .is_ok()
            }
            Err(e) => {
                tracing::debug!(socket = %self.name, "Could not send quit: {}", e);
                false
            }
        };
        if acknowledged {
            tracing::info!(socket = %self.name, "Peer acknowledged close");
        } else {
            tracing::warn!(socket = %self.name, "No close acknowledgement within {:?}", timeout);
        }
        self.shutdown();
        acknowledged
    }

    /// Peer teardown: acknowledge with `"close"` and shut down.
    pub fn acknowledge_close(&mut self, timeout: Duration) {
        if let Err(e) = self.send_control(&ControlMessage::Close, timeout) {
            tracing::debug!(socket = %self.name, "Could not send close: {}", e);
        }
        self.shutdown();
    }

    /// Shut the socket down unconditionally.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            tracing::trace!(socket = %self.name, "Shutdown: {}", e);
        }
        self.status = ConnectionStatus::Closed;
        self.pending.clear();
        self.unread.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (Link, Link) {
        let (a, b) = UnixStream::pair().unwrap();
        let mut owner = Link::new(SocketName::new("owner", 0), a, LinkRole::Owner).unwrap();
        let mut peer = Link::new(SocketName::new("owner", 0), b, LinkRole::Peer).unwrap();
        owner.mark_ready().unwrap();
        peer.mark_ready().unwrap();
        (owner, peer)
    }

    #[test]
    fn test_poll_without_data_is_none() {
        let (mut owner, _peer) = pair();
        assert!(owner.poll().is_none());
        assert!(owner.is_connected());
    }

    #[test]
    fn test_heartbeat_reaches_peer() {
        let (mut owner, mut peer) = pair();
        assert!(owner.heartbeat());
        assert!(owner.heartbeat());
        let drained = peer.drain();
        assert_eq!(drained.bytes, b"11");
        assert_eq!(
            ControlMessage::parse_bytes(&drained.bytes),
            Ok(ControlMessage::Heartbeat)
        );
    }

    #[test]
    fn test_liveness_timeout_marks_disconnected() {
        let (mut owner, _peer) = pair();
        owner.set_liveness(Some(Duration::from_millis(20)));
        let later = Instant::now() + Duration::from_millis(50);
        assert!(owner.check_liveness(later));
        assert_eq!(owner.status(), ConnectionStatus::Disconnected);
        assert!(owner.disconnected_at().is_some());
        // Still pollable after disconnection
        assert!(owner.poll().is_none());
        assert!(!owner.check_liveness(later));
    }

    #[test]
    fn test_received_payload_counts_as_alive() {
        let (mut owner, mut peer) = pair();
        owner.set_liveness(Some(Duration::from_millis(40)));
        std::thread::sleep(Duration::from_millis(25));
        peer.offer(b"x");
        assert_eq!(owner.poll(), Some(b"x".to_vec()));
        std::thread::sleep(Duration::from_millis(25));
        assert!(!owner.check_liveness(Instant::now()));
    }

    #[test]
    fn test_without_liveness_silence_is_fine() {
        let (mut owner, _peer) = pair();
        assert!(!owner.check_liveness(Instant::now() + Duration::from_secs(60)));
        assert!(owner.is_connected());
    }

    #[test]
    fn test_peer_hangup_disconnects() {
        let (mut owner, peer) = pair();
        drop(peer);
        assert!(owner.poll().is_none());
        assert_eq!(owner.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn test_close_waits_for_acknowledgement() {
        let (mut owner, mut peer) = pair();
        let handle = std::thread::spawn(move || {
            let msg = peer
                .recv_until(Duration::from_secs(2), |b| {
                    ControlMessage::parse_bytes(b) == Ok(ControlMessage::Quit)
                })
                .map(|b| ControlMessage::parse_bytes(&b));
            peer.acknowledge_close(Duration::from_millis(100));
            msg
        });
        assert!(owner.close(Duration::from_secs(2)));
        assert_eq!(owner.status(), ConnectionStatus::Closed);
        assert_eq!(handle.join().unwrap().unwrap(), Ok(ControlMessage::Quit));
    }

    #[test]
    fn test_close_without_acknowledgement_still_shuts_down() {
        let (mut owner, _peer) = pair();
        let started = Instant::now();
        assert!(!owner.close(Duration::from_millis(50)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(owner.status(), ConnectionStatus::Closed);
        assert!(!owner.offer(b"late"));
    }

    #[test]
    fn test_unread_bytes_come_back_first() {
        let (mut owner, mut peer) = pair();
        peer.offer(b"late");
        owner
            .recv_until(Duration::from_secs(1), |b| b.len() >= 4)
            .unwrap();
        owner.unread(b"BC");
        owner.unread(b"A");
        assert_eq!(owner.unread_len(), 3);

        peer.offer(b"D");
        let deadline = Instant::now() + Duration::from_secs(1);
        let mut bytes = owner.drain().bytes;
        while bytes.len() < 4 && Instant::now() < deadline {
            bytes.extend(owner.drain().bytes);
        }
        assert_eq!(bytes, b"ABCD");
        assert_eq!(owner.unread_len(), 0);

        owner.unread(b"xyz");
        assert_eq!(owner.poll(), Some(b"xyz".to_vec()));
        owner.unread(b"12345678");
        let buf = owner
            .recv_until(Duration::from_millis(10), |b| b.len() >= 8)
            .unwrap();
        assert_eq!(buf, b"12345678");
    }

    #[test]
    fn test_timestamp_is_little_endian_f64() {
        let (mut owner, mut peer) = pair();
        peer.send_timestamp(1234.5, Duration::from_millis(100)).unwrap();
        let bytes = owner
            .recv_until(Duration::from_secs(1), |b| b.len() >= 8)
            .unwrap();
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        assert_eq!(f64::from_le_bytes(raw), 1234.5);
    }

    #[test]
    fn test_offer_keeps_records_whole_under_backpressure() {
        let (mut owner, mut peer) = pair();
        let payload = vec![0xABu8; 64 * 1024];
        let mut accepted = 0usize;
        for _ in 0..64 {
            if owner.offer(&payload) {
                accepted += 1;
            }
        }
        // Let the reader catch up and the pending tail drain
        let mut received = 0usize;
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            received += peer.drain().bytes.len();
            if owner.flush_pending() && received == accepted * payload.len() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        received += peer.drain().bytes.len();
        assert!(accepted > 0);
        assert_eq!(received, accepted * payload.len());
    }
}
