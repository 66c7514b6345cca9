//! Error types for relaylock
//!
//! `RelayLockError` is the application error enum shared by every crate.
//! Protocol decode failures are defined next to the codec in `relaylock-api`
//! and carried here as their rendered reason.

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum RelayLockError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("connection closed: {0}")]
    Closed(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for RelayLockError {
    fn from(value: std::io::Error) -> Self {
        RelayLockError::Network(value.to_string())
    }
}

impl RelayLockError {
    /// Whether the error means the underlying connection is gone
    pub fn is_closed(&self) -> bool {
        matches!(self, RelayLockError::Closed(_))
    }
}

/// Result alias used across relaylock crates
pub type Result<T, E = RelayLockError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayLockError::IllegalArgument("lock name contains a space".to_string());
        assert_eq!(err.to_string(), "caused: lock name contains a space");

        let err = RelayLockError::Closed("relay:server-2".to_string());
        assert_eq!(err.to_string(), "connection closed: relay:server-2");
        assert!(err.is_closed());
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err: RelayLockError = io.into();
        assert!(matches!(err, RelayLockError::Network(_)));
        assert!(!err.is_closed());
    }
}
