//! Server side of session establishment.

use lime_core::{
    AuthenticationScheme, Node, Reason, Session, SessionCompression, SessionEncryption,
    SessionState, new_envelope_id, reason_codes,
};
use tracing::{debug, info, warn};

use super::{AuthenticationResult, Authenticator, EstablishedSession, run_negotiation};
use crate::channel::Channel;
use crate::error::{ChannelError, ChannelResult};

/// Failed authentication attempts allowed before the session fails.
pub const DEFAULT_MAX_AUTHENTICATION_ATTEMPTS: u32 = 3;

/// What the server offers during negotiation.
#[derive(Debug, Clone)]
pub struct ServerSessionOptions {
    /// The server's own node, sent as `from`.
    pub node: Node,
    pub compression_options: Vec<SessionCompression>,
    pub encryption_options: Vec<SessionEncryption>,
    pub scheme_options: Vec<AuthenticationScheme>,
    pub max_authentication_attempts: u32,
}

impl ServerSessionOptions {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            compression_options: vec![SessionCompression::None],
            encryption_options: vec![SessionEncryption::None],
            scheme_options: vec![AuthenticationScheme::Plain, AuthenticationScheme::Key],
            max_authentication_attempts: DEFAULT_MAX_AUTHENTICATION_ATTEMPTS,
        }
    }

    /// Builder: set the compression options.
    pub fn with_compression_options(mut self, options: Vec<SessionCompression>) -> Self {
        self.compression_options = options;
        self
    }

    /// Builder: set the encryption options.
    pub fn with_encryption_options(mut self, options: Vec<SessionEncryption>) -> Self {
        self.encryption_options = options;
        self
    }

    /// Builder: set the authentication schemes.
    pub fn with_scheme_options(mut self, schemes: Vec<AuthenticationScheme>) -> Self {
        self.scheme_options = schemes;
        self
    }

    /// Builder: set the authentication attempt limit.
    pub fn with_max_authentication_attempts(mut self, attempts: u32) -> Self {
        self.max_authentication_attempts = attempts;
        self
    }
}

/// Drives a channel from `new` to `established` as the server.
#[derive(Debug, Clone)]
pub struct ServerNegotiator {
    options: ServerSessionOptions,
}

impl ServerNegotiator {
    pub fn new(options: ServerSessionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ServerSessionOptions {
        &self.options
    }

    /// Establishes the session, failing the channel on any error.
    pub async fn establish(
        &self,
        channel: &Channel,
        authenticator: &dyn Authenticator,
    ) -> ChannelResult<EstablishedSession> {
        run_negotiation(channel, self.negotiate(channel, authenticator)).await
    }

    async fn negotiate(
        &self,
        channel: &Channel,
        authenticator: &dyn Authenticator,
    ) -> ChannelResult<EstablishedSession> {
        let inner = channel.inner();
        inner.set_local_node(self.options.node.clone());

        let first = inner.receive_session().await?;
        if first.state != SessionState::New {
            return Err(ChannelError::violation(
                reason_codes::SESSION_INVALID_ACTION_FOR_STATE,
                format!("expected a new session, got {}", first.state),
            ));
        }
        let session_id = new_envelope_id();
        inner.set_session_id(session_id.clone());
        debug!(session_id = %session_id, "Negotiating new session");

        self.negotiate_options(channel).await?;

        inner.set_state(SessionState::Authenticating)?;
        let mut offer = inner.session_envelope(SessionState::Authenticating);
        offer.scheme_options = Some(self.options.scheme_options.clone());
        inner.send_session(offer).await?;

        let (remote, role) = self.authenticate(channel, authenticator).await?;
        let remote = if remote.instance.is_empty() {
            let instance: String = session_id.chars().take(8).collect();
            remote.with_instance(instance)
        } else {
            remote
        };

        inner.set_remote_node(remote.clone());
        inner.set_state(SessionState::Established)?;
        inner
            .send_session(inner.session_envelope(SessionState::Established))
            .await?;

        info!(session_id = %session_id, remote = %remote, role = ?role, "Session established");
        Ok(EstablishedSession {
            session_id,
            local_node: self.options.node.clone(),
            remote_node: remote,
            role,
        })
    }

    /// Offers transport options when there is a choice and applies the
    /// client's pick after confirming it.
    async fn negotiate_options(&self, channel: &Channel) -> ChannelResult<()> {
        let inner = channel.inner();
        let transport = inner.transport();

        let supported = transport.supported_compression();
        let compression: Vec<_> = self
            .options
            .compression_options
            .iter()
            .filter(|option| supported.contains(option))
            .copied()
            .collect();
        let supported = transport.supported_encryption();
        let encryption: Vec<_> = self
            .options
            .encryption_options
            .iter()
            .filter(|option| supported.contains(option))
            .copied()
            .collect();

        let (Some(&first_compression), Some(&first_encryption)) =
            (compression.first(), encryption.first())
        else {
            return Err(ChannelError::Negotiation(
                "no transport options in common with the transport".to_string(),
            ));
        };

        let (selected_compression, selected_encryption) =
            if compression.len() > 1 || encryption.len() > 1 {
                inner.set_state(SessionState::Negotiating)?;
                let mut offer = inner.session_envelope(SessionState::Negotiating);
                offer.compression_options = Some(compression.clone());
                offer.encryption_options = Some(encryption.clone());
                inner.send_session(offer).await?;

                let choice = inner.receive_session().await?;
                if choice.state != SessionState::Negotiating {
                    return Err(ChannelError::violation(
                        reason_codes::SESSION_INVALID_ACTION_FOR_STATE,
                        format!("expected a negotiating session, got {}", choice.state),
                    ));
                }
                let selected_compression = choice.compression.unwrap_or(first_compression);
                let selected_encryption = choice.encryption.unwrap_or(first_encryption);
                if !compression.contains(&selected_compression)
                    || !encryption.contains(&selected_encryption)
                {
                    return Err(ChannelError::violation(
                        reason_codes::SESSION_NEGOTIATION_INVALID_OPTIONS,
                        format!(
                            "selected options were not offered (compression {}, encryption {})",
                            selected_compression, selected_encryption
                        ),
                    ));
                }

                let mut confirmation = inner.session_envelope(SessionState::Negotiating);
                confirmation.compression = Some(selected_compression);
                confirmation.encryption = Some(selected_encryption);
                inner.send_session(confirmation).await?;
                (selected_compression, selected_encryption)
            } else {
                (first_compression, first_encryption)
            };

        transport.set_compression(selected_compression).await?;
        transport.set_encryption(selected_encryption).await?;
        debug!(
            compression = %selected_compression,
            encryption = %selected_encryption,
            "Transport options applied"
        );
        Ok(())
    }

    /// Runs authentication rounds until success, or until the attempt
    /// limit is reached.
    async fn authenticate(
        &self,
        channel: &Channel,
        authenticator: &dyn Authenticator,
    ) -> ChannelResult<(Node, lime_core::DomainRole)> {
        let inner = channel.inner();
        let mut failures = 0u32;

        loop {
            let attempt = inner.receive_session().await?;
            if attempt.state != SessionState::Authenticating {
                return Err(ChannelError::violation(
                    reason_codes::SESSION_INVALID_ACTION_FOR_STATE,
                    format!("expected an authenticating session, got {}", attempt.state),
                ));
            }

            let scheme = attempt.scheme.unwrap_or(AuthenticationScheme::Guest);
            if !self.options.scheme_options.contains(&scheme) {
                return Err(ChannelError::session_failed(
                    reason_codes::SESSION_AUTHENTICATION_FAILED,
                    format!("the {} scheme is not accepted", scheme),
                ));
            }
            let Some(from) = attempt.header.from.clone() else {
                return Err(ChannelError::session_failed(
                    reason_codes::SESSION_AUTHENTICATION_FAILED,
                    "authentication without an identity",
                ));
            };

            let result = match attempt.authentication() {
                Ok(Some(credentials)) => {
                    authenticator
                        .authenticate(&from.identity, &credentials)
                        .await
                }
                Ok(None) if scheme == AuthenticationScheme::Guest => {
                    authenticator
                        .authenticate(&from.identity, &lime_core::Authentication::Guest)
                        .await
                }
                Ok(None) => AuthenticationResult::Failure,
                Err(e) => {
                    debug!(error = %e, "Undecodable credentials");
                    AuthenticationResult::Failure
                }
            };

            match result {
                AuthenticationResult::Success(role) => return Ok((from, role)),
                AuthenticationResult::Challenge(challenge) => {
                    debug!(identity = %from.identity, "Sending authentication challenge");
                    let mut round = inner
                        .session_envelope(SessionState::Authenticating)
                        .with_authentication(&challenge);
                    round.header.to = Some(from);
                    inner.send_session(round).await?;
                }
                AuthenticationResult::Failure => {
                    failures += 1;
                    warn!(identity = %from.identity, failures, "Authentication failed");
                    if failures >= self.options.max_authentication_attempts {
                        return Err(ChannelError::session_failed(
                            reason_codes::SESSION_AUTHENTICATION_FAILED,
                            "authentication failed",
                        ));
                    }
                    let mut retry = inner.session_envelope(SessionState::Authenticating);
                    retry.header.to = Some(from);
                    retry.scheme_options = Some(self.options.scheme_options.clone());
                    retry.reason = Some(Reason::new(
                        reason_codes::SESSION_AUTHENTICATION_FAILED,
                        "invalid credentials",
                    ));
                    inner.send_session(retry).await?;
                }
            }
        }
    }
}
