//! Envelope model error types.

use thiserror::Error;

/// Result type for envelope model operations.
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

/// Errors raised while parsing or validating envelope model values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvelopeError {
    /// The identity string could not be parsed.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// The node string could not be parsed.
    #[error("invalid node: {0}")]
    InvalidNode(String),

    /// The media type string could not be parsed.
    #[error("invalid media type: {0}")]
    InvalidMediaType(String),

    /// Document content does not match its media type.
    #[error("invalid document for media type {media_type}: {message}")]
    InvalidDocument { media_type: String, message: String },

    /// JSON object carries none of the envelope discriminants.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Authentication payload does not match its scheme.
    #[error("invalid authentication for scheme {scheme}: {message}")]
    InvalidAuthentication { scheme: String, message: String },
}

impl EnvelopeError {
    /// Creates an invalid document error.
    pub fn invalid_document(media_type: impl ToString, message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            media_type: media_type.to_string(),
            message: message.into(),
        }
    }

    /// Creates an invalid authentication error.
    pub fn invalid_authentication(scheme: impl ToString, message: impl Into<String>) -> Self {
        Self::InvalidAuthentication {
            scheme: scheme.to_string(),
            message: message.into(),
        }
    }
}
