//! Control vocabulary shared by the host and every peripheral helper.
//!
//! Control payloads are short latin-1 texts. Several messages can coalesce in
//! one receive (heartbeats in particular), so recognition is by substring,
//! with two rules that keep it unambiguous:
//!
//! - The `begin<name>end` span is cut out first. The name is opaque: keywords
//!   inside it never count. The span ends at the *last* `end`, so names may
//!   contain `end` themselves.
//! - Keywords are then searched in the text outside the span, in priority
//!   order `quit` > `stop`/`begin` > `close` > `primed` > `ready` > heartbeat.
//!   A payload carrying both `stop` and a `begin…end` span is rejected as
//!   ambiguous rather than guessed at.

use thiserror::Error;

pub const HEARTBEAT: &str = "1";
pub const QUIT: &str = "quit";
pub const STOP: &str = "stop";
pub const CLOSE: &str = "close";
pub const READY: &str = "ready";
pub const PRIMED: &str = "primed";
pub const BEGIN: &str = "begin";
pub const END: &str = "end";

/// Parsed control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Keep-alive from the owner
    Heartbeat,
    /// Terminate; valid in every session state
    Quit,
    /// Stop the current recording
    Stop,
    /// Acknowledges `Quit` after the peer's cleanup
    Close,
    /// Handshake reply
    Ready,
    /// Acquisition armed
    Primed,
    /// Start recording into `name`
    Begin { name: String },
}

/// Why a payload was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlError {
    #[error("empty control payload")]
    Empty,

    #[error("unrecognized control payload {0:?}")]
    Unrecognized(String),

    #[error("ambiguous control payload {0:?}")]
    Ambiguous(String),

    #[error("'begin' without matching 'end' in {0:?}")]
    UnterminatedBegin(String),

    #[error("empty output name in 'begin…end'")]
    EmptyName,
}

impl ControlMessage {
    /// Start-recording message for `name`
    pub fn begin(name: impl Into<String>) -> Self {
        ControlMessage::Begin { name: name.into() }
    }

    /// Text sent on the wire
    pub fn to_payload(&self) -> String {
        match self {
            ControlMessage::Heartbeat => HEARTBEAT.to_string(),
            ControlMessage::Quit => QUIT.to_string(),
            ControlMessage::Stop => STOP.to_string(),
            ControlMessage::Close => CLOSE.to_string(),
            ControlMessage::Ready => READY.to_string(),
            ControlMessage::Primed => PRIMED.to_string(),
            ControlMessage::Begin { name } => format!("{}{}{}", BEGIN, name, END),
        }
    }

    /// Parse raw bytes as latin-1 text
    pub fn parse_bytes(payload: &[u8]) -> Result<Self, ControlError> {
        Self::parse(&latin1(payload))
    }

    /// Parse a control payload
    pub fn parse(payload: &str) -> Result<Self, ControlError> {
        if payload.is_empty() {
            return Err(ControlError::Empty);
        }

        let (outside, name) = split_begin_span(payload)?;

        if outside.contains(QUIT) {
            return Ok(ControlMessage::Quit);
        }

        let stop = outside.contains(STOP);
        match (stop, name) {
            (true, Some(_)) => return Err(ControlError::Ambiguous(payload.to_string())),
            (true, None) => return Ok(ControlMessage::Stop),
            (false, Some(name)) => {
                if name.is_empty() {
                    return Err(ControlError::EmptyName);
                }
                if name.contains(BEGIN) {
                    return Err(ControlError::Ambiguous(payload.to_string()));
                }
                return Ok(ControlMessage::Begin { name });
            }
            (false, None) => {}
        }

        if outside.contains(CLOSE) {
            Ok(ControlMessage::Close)
        } else if outside.contains(PRIMED) {
            Ok(ControlMessage::Primed)
        } else if outside.contains(READY) {
            Ok(ControlMessage::Ready)
        } else if outside.contains(HEARTBEAT) {
            Ok(ControlMessage::Heartbeat)
        } else {
            Err(ControlError::Unrecognized(payload.to_string()))
        }
    }
}

impl std::fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_payload())
    }
}

/// Returns the text outside the `begin…end` span and the name inside it.
fn split_begin_span(payload: &str) -> Result<(String, Option<String>), ControlError> {
    let Some(start) = payload.find(BEGIN) else {
        return Ok((payload.to_string(), None));
    };
    let name_start = start + BEGIN.len();
    let Some(name_len) = payload[name_start..].rfind(END) else {
        return Err(ControlError::UnterminatedBegin(payload.to_string()));
    };
    let name_end = name_start + name_len;

    let mut outside = String::with_capacity(payload.len());
    outside.push_str(&payload[..start]);
    outside.push_str(&payload[name_end + END.len()..]);
    Ok((outside, Some(payload[name_start..name_end].to_string())))
}

/// Byte offset of the first occurrence of `token` in `bytes`
pub fn find_token(bytes: &[u8], token: &str) -> Option<usize> {
    let needle = token.as_bytes();
    if needle.is_empty() {
        return Some(0);
    }
    bytes.windows(needle.len()).position(|w| w == needle)
}

/// Decode bytes as latin-1 (every byte maps to one char).
pub fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
