//! Protocol decode errors

use relaylock_common::RelayLockError;

/// Errors raised while turning a frame into a message
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid message")]
    EmptyFrame,

    #[error("Invalid message: frame is not valid UTF-8")]
    InvalidUtf8,

    #[error("Invalid keyword: {0}")]
    UnknownKeyword(String),

    #[error("Invalid message: {keyword} expects {expected} arguments, got {actual}")]
    ArgumentCount {
        keyword: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid duration: {0}")]
    InvalidDuration(String),

    #[error("Invalid status: {0}")]
    InvalidStatus(String),
}

impl From<ProtocolError> for RelayLockError {
    fn from(value: ProtocolError) -> Self {
        RelayLockError::Protocol(value.to_string())
    }
}
