//! Protocol error types.

use lime_core::EnvelopeError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, framing or transporting envelopes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Envelope exceeds maximum allowed size.
    #[error("envelope too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: u32, max: u32 },

    /// Failed to serialize or parse JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// JSON was valid but is not an envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(#[from] EnvelopeError),

    /// IO error during read/write.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Incomplete frame (stream ended before the full frame was received).
    #[error("incomplete message: expected {expected} bytes, got {received}")]
    IncompleteMessage { expected: usize, received: usize },

    /// Empty frame received.
    #[error("empty message")]
    EmptyMessage,

    /// Operation timed out.
    #[error("timeout during {operation}")]
    Timeout { operation: String },

    /// The connection was closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport was used before being opened.
    #[error("transport is not connected")]
    NotConnected,

    /// The transport cannot apply the requested option.
    #[error("unsupported {kind} option: {value}")]
    UnsupportedOption { kind: &'static str, value: String },

    /// The transport address could not be understood.
    #[error("invalid transport uri: {0}")]
    InvalidUri(String),

    /// The transport faulted.
    #[error("transport failed: {0}")]
    TransportFailed(String),
}

impl ProtocolError {
    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Creates an unsupported option error.
    pub fn unsupported(kind: &'static str, value: impl ToString) -> Self {
        Self::UnsupportedOption {
            kind,
            value: value.to_string(),
        }
    }

    /// True when the peer closed the connection rather than faulting.
    pub fn is_connection_closed(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
