//! Server error types.

use std::io;

use lime_channel::ChannelError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while hosting channels.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (bind, accept).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (framing, encoding).
    #[error("Protocol error: {0}")]
    Protocol(#[from] lime_protocol::ProtocolError),

    /// Session establishment failed for one connection.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The listener stopped accepting connections.
    #[error("Listener shut down")]
    Shutdown,
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
