//! Error types for the client replica.

use syncobj_protocol::ProtocolError;
use thiserror::Error;

/// Result type for replica operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client replica.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Sending to the server failed.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The server sent an update for an object this replica never asked about.
    #[error("unknown object: {0}")]
    UnknownObject(String),

    /// A message from the server could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A pending init was abandoned because a flush failed.
    #[error("init aborted: {0}")]
    InitAborted(String),

    /// Encoding failed in the protocol layer.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if calling the operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { retryable, .. } => *retryable,
            ClientError::InitAborted(_) => true,
            _ => false,
        }
    }
}

impl From<ProtocolError> for ClientError {
    fn from(error: ProtocolError) -> Self {
        Self::Protocol(error.to_string())
    }
}
