use serde::{Deserialize, Serialize};
use std::fmt;

/// Cause of a session error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport-level failure.
    Connection,
    /// No frames within the media timeout.
    Media,
    /// Handshake or signaling timeout.
    Timeout,
    Sdp,
    Ice,
    Unknown,
}

impl ErrorKind {
    /// Map an `error_type` received from the signaling server.
    pub fn from_wire(error_type: &str) -> Self {
        match error_type {
            "connection" => ErrorKind::Connection,
            "media" => ErrorKind::Media,
            "timeout" => ErrorKind::Timeout,
            "sdp" => ErrorKind::Sdp,
            "ice" => ErrorKind::Ice,
            _ => ErrorKind::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "connection",
            ErrorKind::Media => "media",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Sdp => "sdp",
            ErrorKind::Ice => "ice",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct SessionError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl SessionError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Negotiating,
    WaitingForMedia,
    Streaming,
    Error(SessionError),
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Negotiating => "negotiating",
            SessionState::WaitingForMedia => "waiting_for_media",
            SessionState::Streaming => "streaming",
            SessionState::Error(_) => "error",
        }
    }

    /// A connection attempt is in flight or established.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting
                | SessionState::Negotiating
                | SessionState::WaitingForMedia
                | SessionState::Streaming
        )
    }

    pub fn error(&self) -> Option<&SessionError> {
        match self {
            SessionState::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Error(e) => write!(f, "error({})", e.kind),
            other => f.write_str(other.name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_error_types_map_to_kinds() {
        assert_eq!(ErrorKind::from_wire("sdp"), ErrorKind::Sdp);
        assert_eq!(ErrorKind::from_wire("protocol"), ErrorKind::Unknown);
        assert_eq!(ErrorKind::from_wire(ErrorKind::Ice.as_str()), ErrorKind::Ice);
    }

    #[test]
    fn error_state_displays_kind() {
        let state = SessionState::Error(SessionError::new(ErrorKind::Timeout, "slow", true));
        assert_eq!(state.to_string(), "error(timeout)");
        assert!(!state.is_active());
        assert!(SessionState::Negotiating.is_active());
    }
}
