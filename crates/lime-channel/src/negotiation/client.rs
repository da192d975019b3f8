//! Client side of session establishment.

use std::fmt;
use std::sync::Arc;

use lime_core::{
    Authentication, DomainRole, Identity, Node, Reason, Session, SessionCompression,
    SessionEncryption, SessionState, reason_codes,
};
use tracing::{debug, info};

use super::{EstablishedSession, run_negotiation};
use crate::channel::Channel;
use crate::error::{ChannelError, ChannelResult};

/// Answers an authentication challenge sent by the server.
pub type ChallengeResponder = Arc<dyn Fn(&Authentication) -> Authentication + Send + Sync>;

/// What the client asks for during negotiation.
#[derive(Clone)]
pub struct ClientSessionOptions {
    pub identity: Identity,
    /// Instance name; the server assigns one when absent.
    pub instance: Option<String>,
    pub authentication: Authentication,
    /// Preferred compression options, best first.
    pub compression: Vec<SessionCompression>,
    /// Preferred encryption options, best first.
    pub encryption: Vec<SessionEncryption>,
    pub challenge_responder: Option<ChallengeResponder>,
}

impl ClientSessionOptions {
    pub fn new(identity: Identity, authentication: Authentication) -> Self {
        Self {
            identity,
            instance: None,
            authentication,
            compression: vec![SessionCompression::None],
            encryption: vec![SessionEncryption::None],
            challenge_responder: None,
        }
    }

    /// Builder: set the instance name.
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Builder: set the compression preference.
    pub fn with_compression(mut self, preference: Vec<SessionCompression>) -> Self {
        self.compression = preference;
        self
    }

    /// Builder: set the encryption preference.
    pub fn with_encryption(mut self, preference: Vec<SessionEncryption>) -> Self {
        self.encryption = preference;
        self
    }

    /// Builder: set the challenge responder.
    pub fn with_challenge_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&Authentication) -> Authentication + Send + Sync + 'static,
    {
        self.challenge_responder = Some(Arc::new(responder));
        self
    }

    fn node(&self) -> Node {
        self.identity
            .to_node(self.instance.clone().unwrap_or_default())
    }
}

impl fmt::Debug for ClientSessionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSessionOptions")
            .field("identity", &self.identity)
            .field("instance", &self.instance)
            .field("authentication", &self.authentication)
            .field("compression", &self.compression)
            .field("encryption", &self.encryption)
            .field("challenge_responder", &self.challenge_responder.is_some())
            .finish()
    }
}

/// Picks the first preferred option the server offered, or the first
/// offered option when none of the preferred ones are.
fn select<T: Copy + PartialEq>(preference: &[T], offered: &[T]) -> Option<T> {
    preference
        .iter()
        .find(|option| offered.contains(option))
        .or_else(|| offered.first())
        .copied()
}

/// Drives a channel from `new` to `established` as the client.
#[derive(Debug, Clone)]
pub struct ClientNegotiator {
    options: ClientSessionOptions,
}

impl ClientNegotiator {
    pub fn new(options: ClientSessionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ClientSessionOptions {
        &self.options
    }

    /// Establishes the session, failing the channel on any error.
    pub async fn establish(&self, channel: &Channel) -> ChannelResult<EstablishedSession> {
        run_negotiation(channel, self.negotiate(channel)).await
    }

    async fn negotiate(&self, channel: &Channel) -> ChannelResult<EstablishedSession> {
        let inner = channel.inner();
        let local = self.options.node();
        inner.set_local_node(local.clone());

        debug!(identity = %self.options.identity, "Starting session");
        inner.send_session(Session::new(SessionState::New)).await?;

        loop {
            let session = inner.receive_session().await?;
            if let Some(id) = session.header.id.as_deref() {
                inner.set_session_id(id);
            }

            match session.state {
                SessionState::Negotiating => {
                    inner.set_state(SessionState::Negotiating)?;
                    self.negotiate_options(channel, &session).await?;
                }
                SessionState::Authenticating => {
                    inner.set_state(SessionState::Authenticating)?;
                    self.authenticate(channel, &local, &session).await?;
                }
                SessionState::Established => {
                    let local = session.header.to.clone().unwrap_or(local);
                    let remote = session.header.from.clone().unwrap_or_default();
                    inner.set_local_node(local.clone());
                    inner.set_remote_node(remote.clone());
                    inner.set_state(SessionState::Established)?;

                    let session_id = inner.session_id().unwrap_or_default();
                    info!(session_id = %session_id, local = %local, remote = %remote, "Session established");
                    return Ok(EstablishedSession {
                        session_id,
                        local_node: local,
                        remote_node: remote,
                        role: DomainRole::Unknown,
                    });
                }
                SessionState::Failed => {
                    let reason = session.reason.unwrap_or_else(|| {
                        Reason::new(reason_codes::SESSION_ERROR, "session failed by server")
                    });
                    let error = ChannelError::SessionFailed { reason };
                    inner
                        .shutdown(SessionState::Failed, Some(error.clone()))
                        .await;
                    return Err(error);
                }
                other => {
                    return Err(ChannelError::violation(
                        reason_codes::SESSION_INVALID_ACTION_FOR_STATE,
                        format!("unexpected {} session during negotiation", other),
                    ));
                }
            }
        }
    }

    /// Answers an option offer, or applies the server's confirmation.
    async fn negotiate_options(&self, channel: &Channel, session: &Session) -> ChannelResult<()> {
        let inner = channel.inner();

        if session.compression_options.is_some() || session.encryption_options.is_some() {
            let offered_compression = session.compression_options.clone().unwrap_or_default();
            let offered_encryption = session.encryption_options.clone().unwrap_or_default();
            let compression = select(&self.options.compression, &offered_compression)
                .unwrap_or(SessionCompression::None);
            let encryption = select(&self.options.encryption, &offered_encryption)
                .unwrap_or(SessionEncryption::None);
            debug!(%compression, %encryption, "Selecting transport options");

            let mut choice = inner.session_envelope(SessionState::Negotiating);
            choice.compression = Some(compression);
            choice.encryption = Some(encryption);
            return inner.send_session(choice).await;
        }

        if session.compression.is_none() && session.encryption.is_none() {
            return Err(ChannelError::violation(
                reason_codes::SESSION_NEGOTIATION_INVALID_OPTIONS,
                "negotiating session without options",
            ));
        }

        // The confirmation is the last envelope before the options apply.
        let transport = inner.transport();
        if let Some(compression) = session.compression {
            transport.set_compression(compression).await?;
        }
        if let Some(encryption) = session.encryption {
            transport.set_encryption(encryption).await?;
        }
        debug!(
            compression = %transport.compression(),
            encryption = %transport.encryption(),
            "Transport options applied"
        );
        Ok(())
    }

    /// Presents credentials, or answers a challenge.
    async fn authenticate(
        &self,
        channel: &Channel,
        local: &Node,
        session: &Session,
    ) -> ChannelResult<()> {
        let inner = channel.inner();
        let credentials = if let Some(schemes) = &session.scheme_options {
            let scheme = self.options.authentication.scheme();
            if !schemes.contains(&scheme) {
                return Err(ChannelError::session_failed(
                    reason_codes::SESSION_AUTHENTICATION_FAILED,
                    format!("the server does not accept the {} scheme", scheme),
                ));
            }
            if let Some(reason) = &session.reason {
                debug!(reason = %reason, "Server asked to authenticate again");
            }
            self.options.authentication.clone()
        } else {
            let challenge = session.authentication().map_err(|e| {
                ChannelError::violation(reason_codes::SESSION_AUTHENTICATION_FAILED, e.to_string())
            })?;
            let (Some(challenge), Some(responder)) = (challenge, &self.options.challenge_responder)
            else {
                return Err(ChannelError::session_failed(
                    reason_codes::SESSION_AUTHENTICATION_FAILED,
                    "unanswerable authentication challenge",
                ));
            };
            debug!(scheme = %challenge.scheme(), "Answering authentication challenge");
            responder(&challenge)
        };

        let mut attempt = Session::new(SessionState::Authenticating).with_authentication(&credentials);
        attempt.header.id = inner.session_id();
        attempt.header.from = Some(local.clone());
        inner.send_session(attempt).await
    }
}
