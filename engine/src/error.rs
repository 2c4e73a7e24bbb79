//! Error types for the shared-data protocol core.

use thiserror::Error;

/// All possible errors from the protocol core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Payload errors
    #[error("failed to decode value for key '{key}': {reason}")]
    Decode { key: String, reason: String },

    #[error("malformed notification: {0}")]
    MalformedNotification(String),

    // Pattern errors
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::Decode {
            key: "a".into(),
            reason: "expected value at line 1 column 1".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to decode value for key 'a': expected value at line 1 column 1"
        );

        let err = Error::MalformedNotification("missing field `k`".into());
        assert_eq!(err.to_string(), "malformed notification: missing field `k`");
    }
}
