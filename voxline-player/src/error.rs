//! Error types for voxline-player
//!
//! The playback engine distinguishes four failure classes:
//! - `Cancelled`: the owning session was superseded or stopped; benign
//! - `Transport`: the provider stream failed; aborts one segment
//! - `Decode`: the PCM payload was malformed or truncated; aborts one segment
//! - `Device`: the audio output could not be opened or was lost; aborts the session

use thiserror::Error;
use voxline_common::SessionState;

/// Main error type for voxline-player
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The owning session was invalidated while the operation ran
    #[error("Session cancelled")]
    Cancelled,

    /// Provider stream failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    Device(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Rejected session state change
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    /// Operation needs a current session
    #[error("No active session")]
    NoActiveSession,

    /// Errors from the shared library
    #[error(transparent)]
    Common(#[from] voxline_common::Error),
}

impl Error {
    /// Whether this error only reports that the owning session went away.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Whether this error ends the whole session rather than one segment.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Error::Device(_))
    }
}

/// Failure reported by a provider byte stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self(e.to_string())
    }
}

/// Convenience Result type using voxline-player Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::Cancelled.is_cancellation());
        assert!(!Error::Cancelled.is_session_fatal());
        assert!(Error::Device("gone".into()).is_session_fatal());
        assert!(!Error::Decode("odd byte".into()).is_session_fatal());
        assert!(!Error::Transport(TransportError::new("reset")).is_cancellation());
    }

    #[test]
    fn test_transition_error_message() {
        let err = Error::InvalidTransition {
            from: SessionState::Idle,
            to: SessionState::Playing,
        };
        assert_eq!(err.to_string(), "Invalid session transition: idle -> playing");
    }
}
