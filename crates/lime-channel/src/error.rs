//! Channel error types.

use std::sync::Arc;

use lime_core::{QueueError, Reason, SessionState, reason_codes};
use lime_protocol::ProtocolError;
use thiserror::Error;

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

/// Errors returned by channel operations.
///
/// Transport faults, protocol violations and failed sessions are terminal
/// for the channel. Usage errors and timeouts only affect the call that
/// returned them.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// The operation is not allowed in the current session state.
    #[error("cannot {operation} while the session is {state}")]
    InvalidState {
        state: SessionState,
        operation: &'static str,
    },

    /// The channel was closed.
    #[error("channel closed")]
    Closed,

    /// The transport faulted.
    #[error("transport error: {0}")]
    Transport(Arc<ProtocolError>),

    /// The peer broke the session protocol.
    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: Reason },

    /// The session ended in the `failed` state.
    #[error("session failed: {reason}")]
    SessionFailed { reason: Reason },

    /// Another command with the same id is awaiting its response.
    #[error("a command with id '{0}' is already pending")]
    DuplicateCommandId(String),

    /// The command cannot be processed as a request.
    #[error("invalid command: {0}")]
    InvalidCommand(String),

    /// Queue usage error.
    #[error(transparent)]
    Queue(QueueError),

    /// The operation did not complete in time.
    #[error("timeout during {operation}")]
    Timeout { operation: &'static str },

    /// Negotiation could not agree on session options.
    #[error("negotiation failed: {0}")]
    Negotiation(String),
}

impl ChannelError {
    pub(crate) fn violation(code: i32, description: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: Reason::new(code, description),
        }
    }

    pub(crate) fn session_failed(code: i32, description: impl Into<String>) -> Self {
        Self::SessionFailed {
            reason: Reason::new(code, description),
        }
    }

    /// True for transport faults.
    pub fn is_transport_fault(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// True for caller mistakes that never change channel state.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidState { .. }
                | Self::DuplicateCommandId(_)
                | Self::InvalidCommand(_)
                | Self::Queue(QueueError::PromisesLimitReached { .. })
        )
    }

    /// True when the channel is gone and a fresh one may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Closed)
    }

    /// The reason carried by protocol violations and failed sessions.
    pub fn reason(&self) -> Option<&Reason> {
        match self {
            Self::ProtocolViolation { reason } | Self::SessionFailed { reason } => Some(reason),
            _ => None,
        }
    }

    /// Reason to report to the peer when this error fails the session.
    pub fn to_reason(&self) -> Reason {
        match self {
            Self::ProtocolViolation { reason } | Self::SessionFailed { reason } => reason.clone(),
            Self::Timeout { .. } => {
                Reason::new(reason_codes::SESSION_NEGOTIATION_TIMEOUT, self.to_string())
            }
            Self::Negotiation(message) => Reason::new(
                reason_codes::SESSION_NEGOTIATION_INVALID_OPTIONS,
                message.clone(),
            ),
            _ => Reason::new(reason_codes::SESSION_ERROR, self.to_string()),
        }
    }
}

impl From<ProtocolError> for ChannelError {
    fn from(e: ProtocolError) -> Self {
        Self::Transport(Arc::new(e))
    }
}

impl From<QueueError> for ChannelError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Closed => Self::Closed,
            other => Self::Queue(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        let transport = ChannelError::from(ProtocolError::ConnectionClosed);
        assert!(transport.is_transport_fault());
        assert!(transport.is_retryable());
        assert!(!transport.is_usage_error());

        assert!(ChannelError::DuplicateCommandId("1".into()).is_usage_error());
        assert!(
            ChannelError::from(QueueError::PromisesLimitReached { limit: 2 }).is_usage_error()
        );
        assert!(ChannelError::Closed.is_retryable());
        assert!(!ChannelError::Timeout { operation: "command" }.is_retryable());
    }

    #[test]
    fn closed_queue_means_closed_channel() {
        assert!(matches!(
            ChannelError::from(QueueError::Closed),
            ChannelError::Closed
        ));
    }

    #[test]
    fn reasons_for_the_peer() {
        let violation = ChannelError::violation(reason_codes::SESSION_INVALID_ACTION_FOR_STATE, "x");
        assert_eq!(
            violation.to_reason().code,
            reason_codes::SESSION_INVALID_ACTION_FOR_STATE
        );
        assert_eq!(
            ChannelError::Timeout { operation: "negotiation" }.to_reason().code,
            reason_codes::SESSION_NEGOTIATION_TIMEOUT
        );
        assert_eq!(
            ChannelError::Closed.to_reason().code,
            reason_codes::SESSION_ERROR
        );
    }

    #[test]
    fn display_includes_state() {
        let error = ChannelError::InvalidState {
            state: SessionState::Negotiating,
            operation: "send a message",
        };
        assert_eq!(
            error.to_string(),
            "cannot send a message while the session is negotiating"
        );
    }
}
