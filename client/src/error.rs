//! Unified error handling for the client.

use crate::transport::TransportError;

/// Client error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Engine error: {0}")]
    Engine(#[from] shared_data_engine::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Invalid argument: {0}")]
    Validation(String),

    #[error("Engine failed to become ready: {0}")]
    NotReady(String),
}

impl Error {
    /// Whether this error came from the store connection.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions() {
        let err: Error = TransportError::Disconnected.into();
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "Transport error: connection closed");

        let err: Error = shared_data_engine::Error::MalformedNotification("x".into()).into();
        assert!(!err.is_transport());
        assert_eq!(err.to_string(), "Engine error: malformed notification: x");
    }
}
