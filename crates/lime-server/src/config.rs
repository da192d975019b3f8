//! Server configuration.

use lime_channel::negotiation::DEFAULT_MAX_AUTHENTICATION_ATTEMPTS;
use lime_channel::{ChannelConfig, ServerSessionOptions};
use lime_core::{AuthenticationScheme, Identity, Node, SessionCompression, SessionEncryption};

use crate::error::{ServerError, ServerResult};

/// Default listening address; 55321 is the registered Lime port.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:55321";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on, `host:port`.
    pub bind_addr: String,

    /// The server's node, sent as `from` on session envelopes.
    pub node: Node,

    /// Compression options offered to clients.
    pub compression_options: Vec<SessionCompression>,

    /// Encryption options offered to clients.
    pub encryption_options: Vec<SessionEncryption>,

    /// Authentication schemes accepted from clients.
    pub scheme_options: Vec<AuthenticationScheme>,

    /// Maximum concurrent connections.
    pub max_connections: usize,

    /// Failed authentication attempts allowed per session.
    pub max_authentication_attempts: u32,

    /// Settings for every accepted channel.
    pub channel: ChannelConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            node: Node::new(Identity::new("postmaster", "localhost"), "server"),
            compression_options: vec![SessionCompression::None],
            encryption_options: vec![SessionEncryption::None],
            scheme_options: vec![AuthenticationScheme::Plain, AuthenticationScheme::Key],
            max_connections: 100,
            max_authentication_attempts: DEFAULT_MAX_AUTHENTICATION_ATTEMPTS,
            channel: ChannelConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Creates a server configuration for the given address and node.
    pub fn new(bind_addr: impl Into<String>, node: Node) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            node,
            ..Default::default()
        }
    }

    /// Builder: set compression options.
    pub fn with_compression_options(mut self, options: Vec<SessionCompression>) -> Self {
        self.compression_options = options;
        self
    }

    /// Builder: set encryption options.
    pub fn with_encryption_options(mut self, options: Vec<SessionEncryption>) -> Self {
        self.encryption_options = options;
        self
    }

    /// Builder: set accepted authentication schemes.
    pub fn with_scheme_options(mut self, schemes: Vec<AuthenticationScheme>) -> Self {
        self.scheme_options = schemes;
        self
    }

    /// Builder: set max connections.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Builder: set the authentication attempt limit.
    pub fn with_max_authentication_attempts(mut self, attempts: u32) -> Self {
        self.max_authentication_attempts = attempts;
        self
    }

    /// Builder: set the channel configuration.
    pub fn with_channel_config(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    /// Checks the settings a listener cannot run without.
    pub fn validate(&self) -> ServerResult<()> {
        if self.max_connections == 0 {
            return Err(ServerError::config("max_connections must be at least 1"));
        }
        if self.max_authentication_attempts == 0 {
            return Err(ServerError::config(
                "max_authentication_attempts must be at least 1",
            ));
        }
        if self.compression_options.is_empty() || self.encryption_options.is_empty() {
            return Err(ServerError::config(
                "at least one compression and one encryption option is required",
            ));
        }
        if self.scheme_options.is_empty() {
            return Err(ServerError::config(
                "at least one authentication scheme is required",
            ));
        }
        Ok(())
    }

    /// Negotiation options derived from this configuration.
    pub fn session_options(&self) -> ServerSessionOptions {
        ServerSessionOptions::new(self.node.clone())
            .with_compression_options(self.compression_options.clone())
            .with_encryption_options(self.encryption_options.clone())
            .with_scheme_options(self.scheme_options.clone())
            .with_max_authentication_attempts(self.max_authentication_attempts)
    }
}
