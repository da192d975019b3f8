//! Session establishment.
//!
//! Both roles drive the channel through
//! `new → negotiating → authenticating → established`, or to `failed`:
//!
//! ```text
//! client                              server
//!   | -- session{new} -------------------> |
//!   | <------ session{negotiating, options} |   only when there is a choice
//!   | -- session{negotiating, choice} ---> |
//!   | <----- session{negotiating, choice}  |   both apply the options now
//!   | <--- session{authenticating, schemes}|
//!   | -- session{authenticating, creds} -> |
//!   | <------------- session{established}  |
//! ```

mod authenticator;
mod client;
mod server;

use std::future::Future;

use lime_core::{DomainRole, Node, SessionState};
use tracing::warn;

use crate::channel::Channel;
use crate::error::{ChannelError, ChannelResult};

pub use authenticator::{AllowAllAuthenticator, AuthenticationResult, Authenticator};
pub use client::{ChallengeResponder, ClientNegotiator, ClientSessionOptions};
pub use server::{DEFAULT_MAX_AUTHENTICATION_ATTEMPTS, ServerNegotiator, ServerSessionOptions};

/// Result of a successful negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstablishedSession {
    pub session_id: String,
    /// This side's node, as confirmed by the server.
    pub local_node: Node,
    pub remote_node: Node,
    /// Role granted to the client. Always `Unknown` on the client side.
    pub role: DomainRole,
}

/// Runs a negotiation bounded by the channel's negotiation timeout and
/// fails the channel when it does not succeed.
async fn run_negotiation<F>(channel: &Channel, negotiation: F) -> ChannelResult<EstablishedSession>
where
    F: Future<Output = ChannelResult<EstablishedSession>>,
{
    let limit = channel.config().negotiation_timeout;
    let error = match tokio::time::timeout(limit, negotiation).await {
        Ok(Ok(session)) => return Ok(session),
        Ok(Err(e)) => e,
        Err(_) => ChannelError::Timeout {
            operation: "session negotiation",
        },
    };

    warn!(error = %error, session_id = ?channel.session_id(), "Session negotiation failed");
    let inner = channel.inner();
    match &error {
        ChannelError::Transport(_) | ChannelError::Closed => {
            inner
                .shutdown(SessionState::Failed, Some(error.clone()))
                .await;
        }
        // A no-op when the peer already failed the session.
        _ => inner.fail_session(error.to_reason(), error.clone()).await,
    }
    Err(error)
}
