//! Session state machine
//!
//! Pure transition logic shared by every recording peripheral. The machine
//! never performs I/O: each input returns a [`SessionAction`] for the caller
//! to carry out, and the caller reports the outcome back
//! ([`SessionMachine::armed`], [`SessionMachine::stopped`], ...).
//!
//! ```text
//! Idle ──begin<name>end──► Primed ──armed──► Recording ──stop──► Stopping ──stopped──► Idle
//!   ▲                        │
//!   └──────arm_failed────────┘            quit / link lost: Teardown from any state
//! ```

use super::types::SessionState;
use crate::link::control::{ControlError, ControlMessage};
use std::path::PathBuf;

/// What the caller has to do next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Nothing to do
    None,
    /// Open outputs for `output` and start acquiring
    Arm { output: PathBuf },
    /// Run the stop sequence
    Stop,
    /// Shut down; run the stop sequence first if `stop_first`
    Teardown { stop_first: bool },
}

/// Idle → Primed → Recording → Stopping → Idle
#[derive(Debug, Default)]
pub struct SessionMachine {
    state: SessionState,
    output: Option<PathBuf>,
    terminated: bool,
}

impl SessionMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Output of the current session
    pub fn output(&self) -> Option<&PathBuf> {
        self.output.as_ref()
    }

    /// Whether teardown has been requested
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feed the result of parsing one received payload.
    pub fn on_payload(
        &mut self,
        parsed: Result<ControlMessage, ControlError>,
    ) -> SessionAction {
        match parsed {
            Ok(message) => self.on_message(message),
            Err(e) => {
                tracing::warn!("Ignoring control payload: {}", e);
                SessionAction::None
            }
        }
    }

    pub fn on_message(&mut self, message: ControlMessage) -> SessionAction {
        if self.terminated {
            return SessionAction::None;
        }
        match message {
            ControlMessage::Quit => self.teardown(),
            ControlMessage::Begin { name } => match self.state {
                SessionState::Idle => {
                    tracing::info!("Session begin: {}", name);
                    let output = PathBuf::from(name);
                    self.output = Some(output.clone());
                    self.state = SessionState::Primed;
                    SessionAction::Arm { output }
                }
                state => {
                    tracing::warn!("Ignoring begin for {} while {}", name, state);
                    SessionAction::None
                }
            },
            ControlMessage::Stop => match self.state {
                SessionState::Recording | SessionState::Primed => {
                    self.state = SessionState::Stopping;
                    SessionAction::Stop
                }
                state => {
                    tracing::debug!("Ignoring stop while {}", state);
                    SessionAction::None
                }
            },
            ControlMessage::Heartbeat
            | ControlMessage::Ready
            | ControlMessage::Primed
            | ControlMessage::Close => SessionAction::None,
        }
    }

    /// The owning link went silent or closed; treated like `quit`.
    pub fn on_link_lost(&mut self) -> SessionAction {
        if self.terminated {
            return SessionAction::None;
        }
        tracing::warn!("Control link lost while {}", self.state);
        self.teardown()
    }

    fn teardown(&mut self) -> SessionAction {
        self.terminated = true;
        let stop_first = matches!(self.state, SessionState::Primed | SessionState::Recording);
        if stop_first {
            self.state = SessionState::Stopping;
        }
        SessionAction::Teardown { stop_first }
    }

    /// Arming succeeded: Primed → Recording.
    pub fn armed(&mut self) {
        if self.state == SessionState::Primed {
            self.state = SessionState::Recording;
        }
    }

    /// Arming failed: back to Idle.
    pub fn arm_failed(&mut self) {
        if self.state == SessionState::Primed {
            self.state = SessionState::Idle;
            self.output = None;
        }
    }

    /// Stop sequence finished: Stopping → Idle.
    pub fn stopped(&mut self) {
        if self.state == SessionState::Stopping {
            self.state = SessionState::Idle;
            self.output = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(payload: &str) -> Result<ControlMessage, ControlError> {
        ControlMessage::parse(payload)
    }

    #[test]
    fn test_full_cycle() {
        let mut machine = SessionMachine::new();
        assert_eq!(
            machine.on_payload(parse("begin/data/s.recend")),
            SessionAction::Arm {
                output: PathBuf::from("/data/s.rec")
            }
        );
        assert_eq!(machine.state(), SessionState::Primed);
        machine.armed();
        assert_eq!(machine.state(), SessionState::Recording);

        assert_eq!(machine.on_payload(parse("1")), SessionAction::None);
        assert_eq!(machine.on_payload(parse("stop")), SessionAction::Stop);
        assert_eq!(machine.state(), SessionState::Stopping);
        machine.stopped();
        assert_eq!(machine.state(), SessionState::Idle);
        assert!(machine.output().is_none());
    }

    #[test]
    fn test_quit_from_any_state() {
        let mut idle = SessionMachine::new();
        assert_eq!(
            idle.on_payload(parse("host shutting down: quit requested by operator")),
            SessionAction::Teardown { stop_first: false }
        );
        assert!(idle.is_terminated());

        let mut recording = SessionMachine::new();
        recording.on_message(ControlMessage::begin("/d/a.rec"));
        recording.armed();
        assert_eq!(
            recording.on_message(ControlMessage::Quit),
            SessionAction::Teardown { stop_first: true }
        );
        assert_eq!(recording.state(), SessionState::Stopping);
        // Nothing after teardown
        assert_eq!(recording.on_message(ControlMessage::Stop), SessionAction::None);
    }

    #[test]
    fn test_stop_while_idle_ignored() {
        let mut machine = SessionMachine::new();
        assert_eq!(machine.on_message(ControlMessage::Stop), SessionAction::None);
        assert_eq!(machine.state(), SessionState::Idle);
    }

    #[test]
    fn test_begin_while_recording_ignored() {
        let mut machine = SessionMachine::new();
        machine.on_message(ControlMessage::begin("/d/a.rec"));
        machine.armed();
        assert_eq!(
            machine.on_message(ControlMessage::begin("/d/b.rec")),
            SessionAction::None
        );
        assert_eq!(machine.output(), Some(&PathBuf::from("/d/a.rec")));
    }

    #[test]
    fn test_ambiguous_payload_changes_nothing() {
        let mut machine = SessionMachine::new();
        assert_eq!(
            machine.on_payload(parse("stopbegin/d/a.recend")),
            SessionAction::None
        );
        assert_eq!(machine.state(), SessionState::Idle);
    }

    #[test]
    fn test_filename_with_keywords_is_opaque() {
        let mut machine = SessionMachine::new();
        assert_eq!(
            machine.on_payload(parse("begin/data/stop_quit.recend")),
            SessionAction::Arm {
                output: PathBuf::from("/data/stop_quit.rec")
            }
        );
        assert!(!machine.is_terminated());
    }

    #[test]
    fn test_arm_failure_returns_to_idle() {
        let mut machine = SessionMachine::new();
        machine.on_message(ControlMessage::begin("/d/a.rec"));
        machine.arm_failed();
        assert_eq!(machine.state(), SessionState::Idle);
    }

    #[test]
    fn test_link_lost_tears_down_once() {
        let mut machine = SessionMachine::new();
        machine.on_message(ControlMessage::begin("/d/a.rec"));
        assert_eq!(
            machine.on_link_lost(),
            SessionAction::Teardown { stop_first: true }
        );
        assert_eq!(machine.on_link_lost(), SessionAction::None);
    }
}
