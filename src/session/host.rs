//! Host-side session context
//!
//! One [`SessionContext`] holds every peripheral the host talks to, each in
//! its own optional field. A peripheral that failed to start, or whose link
//! went quiet, simply stays `None`/disconnected; every operation checks
//! before use, so the session degrades instead of failing.
//!
//! The embedding host calls [`SessionContext::tick`] once per frame. It never
//! blocks: heartbeat, drain, decode, liveness. Only
//! [`SessionContext::start_session`] and [`SessionContext::stop_session`]
//! wait, for the acquisition helper's acknowledgements, with bounded
//! timeouts.
//!
//! # Example
//!
//! ```ignore
//! let mut ctx = SessionContext::spawn_all(&config, "/data/2026-10-19/");
//! let handle = ctx.start_session("/data/2026-10-19/s_0001.rec")?;
//! loop {
//!     let tick = ctx.tick();
//!     let dx: f64 = tick.motion[0].iter().map(|s| s.x).sum();
//!     // ...
//! }
//! ctx.stop_session(&handle)?;
//! ctx.teardown();
//! ```

use super::types::{SessionHandle, SessionHeader, SessionState};
use crate::config::{RigConfig, TimeoutPolicy};
use crate::error::{Result, RigError};
use crate::link::control::ControlMessage;
use crate::supervisor::{Peripheral, SpawnOptions, Supervisor};
use crate::types::PeripheralKind;
use crate::wire::{
    lick_table, ByteSample, FeedDecoder, FrameTime, LickSample, MotionSample, Record,
};
use chrono::Utc;
use std::path::{Path, PathBuf};

/// A peripheral slot with the decoder for its feed
#[derive(Debug)]
pub struct FeedSlot<R: Record> {
    peripheral: Option<Peripheral>,
    decoder: FeedDecoder<R>,
}

impl<R: Record> Default for FeedSlot<R> {
    fn default() -> Self {
        Self {
            peripheral: None,
            decoder: FeedDecoder::new(),
        }
    }
}

impl<R: Record> FeedSlot<R> {
    pub fn is_present(&self) -> bool {
        self.peripheral.is_some()
    }

    pub fn peripheral(&self) -> Option<&Peripheral> {
        self.peripheral.as_ref()
    }

    pub fn peripheral_mut(&mut self) -> Option<&mut Peripheral> {
        self.peripheral.as_mut()
    }

    pub fn set(&mut self, peripheral: Peripheral) {
        self.decoder.reset();
        self.peripheral = Some(peripheral);
    }

    pub fn take(&mut self) -> Option<Peripheral> {
        self.peripheral.take()
    }

    /// Heartbeat and drain. Returns the raw bytes and whether the link
    /// dropped during this poll.
    fn poll_raw(&mut self) -> (Vec<u8>, bool) {
        let Some(peripheral) = self.peripheral.as_mut() else {
            return (Vec::new(), false);
        };
        let link = peripheral.link_mut();
        let was_connected = link.is_connected();
        link.heartbeat();
        let drained = link.drain();
        (drained.bytes, was_connected && !link.is_connected())
    }

    fn poll(&mut self) -> (Vec<R>, bool) {
        let (bytes, lost) = self.poll_raw();
        (self.decoder.push(&bytes), lost)
    }
}

/// Everything decoded in one tick
#[derive(Debug, Default, Clone)]
pub struct TickReport {
    /// Motion samples per sensor; never empty for a present sensor
    pub motion: [Vec<MotionSample>; 2],
    pub frame_times: Vec<FrameTime>,
    /// `(t, amplitude)` rows
    pub licks: Vec<[f64; 2]>,
    pub image: Vec<ByteSample>,
    /// Peripherals whose link was lost during this tick
    pub disconnected: Vec<PeripheralKind>,
}

/// Explicit per-session state of the host
#[derive(Debug)]
pub struct SessionContext {
    policy: TimeoutPolicy,
    pub motion: [FeedSlot<MotionSample>; 2],
    pub camera: FeedSlot<FrameTime>,
    pub lick: FeedSlot<LickSample>,
    pub image_sensor: FeedSlot<ByteSample>,
    pub acquisition: Option<Peripheral>,
    pub reward: Option<Peripheral>,
    state: SessionState,
    session: Option<SessionHandle>,
    ticks: u64,
}

impl SessionContext {
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self {
            policy,
            motion: Default::default(),
            camera: FeedSlot::default(),
            lick: FeedSlot::default(),
            image_sensor: FeedSlot::default(),
            acquisition: None,
            reward: None,
            state: SessionState::Idle,
            session: None,
            ticks: 0,
        }
    }

    /// Spawn every enabled peripheral in `config`. Failures leave the slot
    /// empty.
    ///
    /// The acquisition helper watches the host's heartbeats, so it is
    /// spawned last and everything attached so far is heartbeaten between
    /// spawns.
    pub fn spawn_all(config: &RigConfig, context: &str) -> Self {
        let mut ctx = Self::new(config.timeouts.clone());
        let supervisor = Supervisor::new(config.timeouts.clone());
        let mut specs: Vec<_> = config.enabled_peripherals().collect();
        specs.sort_by_key(|spec| spec.kind == PeripheralKind::Acquisition);
        for spec in specs {
            ctx.heartbeat_all();
            let options = SpawnOptions::default().with_env(spec.env.clone());
            match supervisor.spawn_and_handshake(
                spec.kind,
                &spec.socket_base,
                &spec.command,
                context,
                &options,
            ) {
                Ok(mut peripheral) => {
                    if spec.watch_liveness {
                        peripheral
                            .link_mut()
                            .set_liveness(Some(config.timeouts.liveness()));
                    }
                    ctx.attach(peripheral);
                }
                Err(e) => {
                    tracing::error!("{} unavailable, continuing without it: {}", spec.kind, e);
                }
            }
        }
        ctx
    }

    /// Put a peripheral into its slot. A peripheral with no free slot is
    /// shut down.
    pub fn attach(&mut self, peripheral: Peripheral) {
        let kind = peripheral.kind();
        let rejected = match kind {
            PeripheralKind::Motion => match self.motion.iter_mut().find(|s| !s.is_present()) {
                Some(slot) => {
                    slot.set(peripheral);
                    None
                }
                None => Some(peripheral),
            },
            PeripheralKind::Camera => place(&mut self.camera, peripheral),
            PeripheralKind::Lick => place(&mut self.lick, peripheral),
            PeripheralKind::ImageSensor => place(&mut self.image_sensor, peripheral),
            PeripheralKind::Acquisition => place_plain(&mut self.acquisition, peripheral),
            PeripheralKind::Reward => place_plain(&mut self.reward, peripheral),
            PeripheralKind::Preview => Some(peripheral),
        };
        match rejected {
            Some(mut extra) => {
                tracing::warn!("No slot for another {}, shutting it down", kind);
                extra.shutdown(self.policy.close());
            }
            None => tracing::info!("{} attached", kind),
        }
    }

    /// Send one heartbeat on every present link.
    pub fn heartbeat_all(&mut self) {
        let feeds = self
            .motion
            .iter_mut()
            .filter_map(|s| s.peripheral.as_mut())
            .chain(self.camera.peripheral.as_mut())
            .chain(self.lick.peripheral.as_mut())
            .chain(self.image_sensor.peripheral.as_mut());
        for peripheral in feeds
            .chain(self.acquisition.as_mut())
            .chain(self.reward.as_mut())
        {
            peripheral.link_mut().heartbeat();
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Kinds currently present, in slot order
    pub fn present(&self) -> Vec<PeripheralKind> {
        let mut kinds = Vec::new();
        for slot in &self.motion {
            if slot.is_present() {
                kinds.push(PeripheralKind::Motion);
            }
        }
        let others = [
            (self.camera.is_present(), PeripheralKind::Camera),
            (self.lick.is_present(), PeripheralKind::Lick),
            (self.image_sensor.is_present(), PeripheralKind::ImageSensor),
            (self.acquisition.is_some(), PeripheralKind::Acquisition),
            (self.reward.is_some(), PeripheralKind::Reward),
        ];
        kinds.extend(others.iter().filter(|(p, _)| *p).map(|(_, k)| *k));
        kinds
    }

    /// One non-blocking pass over every peripheral.
    pub fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let mut report = TickReport::default();

        for (i, slot) in self.motion.iter_mut().enumerate() {
            if !slot.is_present() {
                continue;
            }
            let (bytes, lost) = slot.poll_raw();
            report.motion[i] = slot.decoder.push_motion(&bytes);
            if lost {
                report.disconnected.push(PeripheralKind::Motion);
            }
        }

        let (frames, lost) = self.camera.poll();
        report.frame_times = frames;
        if lost {
            report.disconnected.push(PeripheralKind::Camera);
        }

        let (licks, lost) = self.lick.poll();
        report.licks = lick_table(&licks);
        if lost {
            report.disconnected.push(PeripheralKind::Lick);
        }

        let (image, lost) = self.image_sensor.poll();
        report.image = image;
        if lost {
            report.disconnected.push(PeripheralKind::ImageSensor);
        }

        for peripheral in [self.acquisition.as_mut(), self.reward.as_mut()]
            .into_iter()
            .flatten()
        {
            let link = peripheral.link_mut();
            let was_connected = link.is_connected();
            link.heartbeat();
            let drained = link.drain();
            if !drained.bytes.is_empty() {
                tracing::trace!(socket = %link.name(), "Discarding {} unsolicited bytes", drained.bytes.len());
            }
            if was_connected && !link.is_connected() {
                report.disconnected.push(peripheral.kind());
            }
        }

        for kind in &report.disconnected {
            tracing::warn!("{} disconnected, continuing without it", kind);
        }
        report
    }

    /// Tell every recording peripheral to start writing `output`.
    ///
    /// Waits for the acquisition helper's `"primed"` and start timestamp; a
    /// missing or silent helper leaves `acquisition_start` empty. A helper
    /// that does not answer in time is sent `"stop"` straight away.
    pub fn start_session(&mut self, output: impl AsRef<Path>) -> Result<SessionHandle> {
        if self.state != SessionState::Idle {
            return Err(RigError::Session(format!(
                "cannot start a session while {}",
                self.state
            )));
        }
        let output = output.as_ref().to_path_buf();
        let begin = ControlMessage::begin(output.display().to_string());
        let mut participants = Vec::new();

        self.state = SessionState::Primed;
        let mut acquisition_start = None;
        if let Some(acquisition) = self.acquisition.as_mut() {
            match arm_acquisition(acquisition, &begin, &self.policy) {
                Ok(started) => {
                    acquisition_start = Some(started);
                    participants.push(PeripheralKind::Acquisition);
                }
                Err(e) => {
                    tracing::error!("Acquisition did not start: {}", e);
                    cancel_arm(acquisition, &self.policy);
                }
            }
        }

        if let Some(camera) = self.camera.peripheral_mut() {
            if camera.link().is_connected() {
                match camera.link_mut().send_control(&begin, self.policy.send()) {
                    Ok(()) => participants.push(PeripheralKind::Camera),
                    Err(e) if e.is_transient() => tracing::debug!("Camera busy, no begin: {}", e),
                    Err(e) => tracing::warn!("Camera did not take begin: {}", e),
                }
            }
        }

        let handle = SessionHandle {
            output,
            acquisition_start,
            started: Utc::now(),
            participants,
        };
        tracing::info!(
            output = %handle.output.display(),
            participants = ?handle.participants,
            "Session started"
        );
        self.session = Some(handle.clone());
        self.state = SessionState::Recording;
        Ok(handle)
    }

    /// Stop the session, collect the acquisition stop time and write the
    /// session header next to the output.
    pub fn stop_session(&mut self, handle: &SessionHandle) -> Result<SessionHeader> {
        match &self.session {
            Some(current) if current.output == handle.output => {}
            _ => {
                return Err(RigError::Session(format!(
                    "{} is not the running session",
                    handle.output.display()
                )))
            }
        }
        self.state = SessionState::Stopping;

        let mut acquisition_stop = None;
        if handle.participants.contains(&PeripheralKind::Acquisition) {
            if let Some(acquisition) = self.acquisition.as_mut() {
                match stop_acquisition(acquisition, &self.policy) {
                    Ok(stopped) => acquisition_stop = Some(stopped),
                    Err(e) => tracing::error!("No stop time from acquisition: {}", e),
                }
            }
        }
        if handle.participants.contains(&PeripheralKind::Camera) {
            if let Some(camera) = self.camera.peripheral_mut() {
                if let Err(e) = camera
                    .link_mut()
                    .send_control(&ControlMessage::Stop, self.policy.send())
                {
                    tracing::warn!("Camera did not take stop: {}", e);
                }
            }
        }

        let header = SessionHeader {
            output: handle.output.clone(),
            acquisition_start: handle.acquisition_start,
            acquisition_stop,
            started: handle.started,
            stopped: Utc::now(),
            participants: handle.participants.clone(),
        };
        let header_path = SessionHeader::path_for(&handle.output);
        let saved = header.save(&header_path);

        self.session = None;
        self.state = SessionState::Idle;
        saved?;
        tracing::info!(header = %header_path.display(), "Session stopped");
        Ok(header)
    }

    /// Stop a running session and shut every peripheral down.
    ///
    /// Returns each peripheral and whether it acknowledged the close.
    pub fn teardown(&mut self) -> Vec<(PeripheralKind, bool)> {
        if let Some(handle) = self.session.clone() {
            if let Err(e) = self.stop_session(&handle) {
                tracing::error!("Stopping session during teardown failed: {}", e);
            }
        }

        let mut peripherals: Vec<Peripheral> = Vec::new();
        for slot in &mut self.motion {
            peripherals.extend(slot.take());
        }
        peripherals.extend(self.camera.take());
        peripherals.extend(self.lick.take());
        peripherals.extend(self.image_sensor.take());
        peripherals.extend(self.acquisition.take());
        peripherals.extend(self.reward.take());

        peripherals
            .into_iter()
            .map(|mut p| {
                let acknowledged = p.shutdown(self.policy.close_for(p.kind()));
                (p.kind(), acknowledged)
            })
            .collect()
    }
}

fn place<R: Record>(slot: &mut FeedSlot<R>, peripheral: Peripheral) -> Option<Peripheral> {
    if slot.is_present() {
        return Some(peripheral);
    }
    slot.set(peripheral);
    None
}

fn place_plain(slot: &mut Option<Peripheral>, peripheral: Peripheral) -> Option<Peripheral> {
    if slot.is_some() {
        return Some(peripheral);
    }
    *slot = Some(peripheral);
    None
}

/// Position of `"primed"` followed by a complete timestamp
fn primed_timestamp(buf: &[u8]) -> Option<f64> {
    let marker = crate::link::control::PRIMED.as_bytes();
    let at = buf.windows(marker.len()).position(|w| w == marker)? + marker.len();
    let bytes: [u8; 8] = buf.get(at..at + 8)?.try_into().ok()?;
    Some(f64::from_le_bytes(bytes))
}

fn arm_acquisition(
    acquisition: &mut Peripheral,
    begin: &ControlMessage,
    policy: &TimeoutPolicy,
) -> Result<f64> {
    let link = acquisition.link_mut();
    if !link.is_connected() {
        return Err(RigError::Session(format!("{} is not connected", link.name())));
    }
    // Anything unread belongs to before this session
    link.drain();
    link.send_control(begin, policy.send())?;
    let buf = link.recv_until(policy.primed() + policy.timestamp(), |b| {
        primed_timestamp(b).is_some()
    })?;
    primed_timestamp(&buf).ok_or_else(|| RigError::Timeout("primed".into()))
}

/// Send `"stop"` after an arm that got no reply, so a helper that armed late
/// does not keep recording. Its late replies are discarded by later ticks.
fn cancel_arm(acquisition: &mut Peripheral, policy: &TimeoutPolicy) {
    let link = acquisition.link_mut();
    if !link.is_connected() {
        return;
    }
    match link.send_control(&ControlMessage::Stop, policy.send()) {
        Ok(()) => tracing::warn!(socket = %link.name(), "Sent stop to cancel an unacknowledged arm"),
        Err(e) => tracing::error!(socket = %link.name(), "Could not cancel arm: {}", e),
    }
}

fn stop_acquisition(acquisition: &mut Peripheral, policy: &TimeoutPolicy) -> Result<f64> {
    let link = acquisition.link_mut();
    // Late replies from an earlier cancelled arm
    link.drain();
    link.send_control(&ControlMessage::Stop, policy.send())?;
    let buf = link.recv_until(policy.timestamp(), |b| b.len() >= 8)?;
    let bytes: [u8; 8] = buf[..8]
        .try_into()
        .map_err(|_| RigError::TransientReceive(link.name().to_string()))?;
    Ok(f64::from_le_bytes(bytes))
}

/// Output path for session `index` under `dir`
pub fn session_output(dir: &Path, index: u32) -> PathBuf {
    dir.join(format!("session_{:04}.rec", index))
}
