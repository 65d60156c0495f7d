//! Error types for the object store.

use syncobj_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the object store.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Sending to a connection failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// A message referenced an object the store has no record of.
    #[error("unknown object: {0}")]
    UnknownObject(String),

    /// Incoming data could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Encoding or decoding failed in the protocol layer.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl ServerError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Returns true if the next fan-out pass may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServerError::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::transport("connection reset").is_retryable());
        assert!(!ServerError::UnknownObject("doc".into()).is_retryable());
        assert!(!ServerError::Malformed("bad".into()).is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ServerError::UnknownObject("my-doc".into());
        assert_eq!(err.to_string(), "unknown object: my-doc");

        let err = ServerError::from(ProtocolError::malformed("not an array"));
        assert!(err.to_string().contains("not an array"));
    }
}
