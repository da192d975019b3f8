//! Client error types.

use std::io;

use lime_channel::ChannelError;
use lime_protocol::ProtocolError;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Connection to the server failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Transport or framing error while connecting.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A channel operation failed.
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Connecting timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The client channel was finished and cannot be used again.
    #[error("client channel finished")]
    Finished,
}

impl ClientError {
    /// True when building a fresh channel and trying again may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io(_) | Self::Connection(_) | Self::Protocol(_) | Self::Timeout(_) => true,
            Self::Channel(e) => e.is_retryable(),
            Self::Config(_) | Self::Finished => false,
        }
    }

    /// The channel error behind this error, if any.
    pub fn channel_error(&self) -> Option<&ChannelError> {
        match self {
            Self::Channel(e) => Some(e),
            _ => None,
        }
    }
}
