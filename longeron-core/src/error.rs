/// Longeron Error Types
///
/// Comprehensive error handling for all client-engine operations.

use std::io;
use thiserror::Error;

/// Main error type for client-engine operations
#[derive(Error, Debug)]
pub enum LongeronError {
    /// IO error during transport operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error while parsing a server frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Command deadline elapsed before the writer flushed it
    #[error("Command canceled before flush")]
    Canceled,

    /// Payload could not be serialized at enqueue time
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Payload could not be deserialized on receive
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Connection was explicitly closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Reconnect retry budget exhausted
    #[error("Reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    /// Server reported an error frame
    #[error("Server error: {0}")]
    Server(String),

    /// Subscription queue was completed or dropped
    #[error("Subscription closed")]
    SubscriptionClosed,

    /// Channel send error
    #[error("Channel send error")]
    ChannelSend,

    /// Channel receive error
    #[error("Channel receive error")]
    ChannelRecv,

    /// An error fanned out to multiple pending completions
    #[error("{0}")]
    Shared(std::sync::Arc<LongeronError>),
}

/// Result type alias for client-engine operations
pub type Result<T> = std::result::Result<T, LongeronError>;

impl LongeronError {
    /// Create a protocol error with a message
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a serialization error with a message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a deserialization error with a message
    pub fn deserialization(msg: impl Into<String>) -> Self {
        Self::Deserialization(msg.into())
    }

    /// Check if this error is transient: the engine retries these
    /// internally and they are not surfaced to callers.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
            ),
            _ => false,
        }
    }

    /// Check if this error terminates the connection
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::ReconnectExhausted { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broken_pipe_is_transient() {
        let err = LongeronError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(err.is_transient());
        assert!(!err.is_fatal());
    }

    #[test]
    fn exhausted_retries_are_fatal() {
        let err = LongeronError::ReconnectExhausted { attempts: 5 };
        assert!(err.is_fatal());
        assert!(!err.is_transient());
    }

    #[test]
    fn cancellation_is_neither_transient_nor_fatal() {
        assert!(!LongeronError::Canceled.is_transient());
        assert!(!LongeronError::Canceled.is_fatal());
    }
}
