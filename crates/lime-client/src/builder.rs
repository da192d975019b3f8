//! Factories producing established channels.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lime_channel::{Channel, ChannelConfig, ClientNegotiator, ClientSessionOptions};
use lime_protocol::{EnvelopeSerializer, TcpTransport, Transport, parse_tcp_uri};
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Builds a fresh, established channel on each call.
#[async_trait]
pub trait ChannelBuilder: Send + Sync {
    async fn build(&self) -> ClientResult<Channel>;
}

#[async_trait]
impl<B: ChannelBuilder + ?Sized> ChannelBuilder for Arc<B> {
    async fn build(&self) -> ClientResult<Channel> {
        (**self).build().await
    }
}

/// Connects over TCP and runs the client negotiation.
#[derive(Debug, Clone)]
pub struct TcpChannelBuilder {
    uri: String,
    options: ClientSessionOptions,
    channel_config: ChannelConfig,
    connect_timeout: Duration,
    serializer: EnvelopeSerializer,
}

impl TcpChannelBuilder {
    /// Creates a builder for `uri` (`net.tcp://host:port`).
    pub fn new(uri: impl Into<String>, options: ClientSessionOptions) -> ClientResult<Self> {
        let uri = uri.into();
        parse_tcp_uri(&uri)?;
        Ok(Self {
            uri,
            options,
            channel_config: ChannelConfig::default(),
            connect_timeout: Duration::from_secs(10),
            serializer: EnvelopeSerializer::default(),
        })
    }

    /// Creates a builder from client configuration.
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        Ok(Self::new(config.uri.clone(), config.session_options()?)?
            .with_channel_config(config.channel_config())
            .with_connect_timeout(config.connect_timeout()))
    }

    /// Builder: set the channel configuration.
    pub fn with_channel_config(mut self, config: ChannelConfig) -> Self {
        self.channel_config = config;
        self
    }

    /// Builder: set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Builder: set the envelope serializer.
    pub fn with_serializer(mut self, serializer: EnvelopeSerializer) -> Self {
        self.serializer = serializer;
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

#[async_trait]
impl ChannelBuilder for TcpChannelBuilder {
    async fn build(&self) -> ClientResult<Channel> {
        let transport = TcpTransport::new(self.serializer.clone());
        tokio::time::timeout(self.connect_timeout, transport.open(&self.uri))
            .await
            .map_err(|_| ClientError::Timeout(format!("connecting to {}", self.uri)))??;
        debug!(uri = %self.uri, peer = ?transport.peer_addr(), "Connected");

        let channel = Channel::new(Arc::new(transport), self.channel_config.clone());
        ClientNegotiator::new(self.options.clone())
            .establish(&channel)
            .await?;
        Ok(channel)
    }
}
