//! TCP listener producing established server channels.
//!
//! Each accepted socket becomes a [`PendingConnection`]. Establishing it
//! runs the server negotiation and yields a [`ServerConnection`] holding
//! an established [`Channel`].

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lime_channel::{Authenticator, Channel, ChannelConfig, EstablishedSession, ServerNegotiator};
use lime_protocol::{EnvelopeSerializer, TcpTransport};
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// Pause after a failed accept, so persistent errors do not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Listens for Lime clients over TCP.
pub struct ChannelListener {
    config: ServerConfig,
    listener: TcpListener,
    negotiator: ServerNegotiator,
    serializer: EnvelopeSerializer,
    /// Limits concurrent connections.
    connection_semaphore: Arc<Semaphore>,
}

impl ChannelListener {
    /// Validates `config` and binds to its address.
    pub async fn bind(config: ServerConfig) -> ServerResult<Self> {
        config.validate()?;
        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!(
            addr = %listener.local_addr()?,
            node = %config.node,
            "Channel listener bound"
        );

        Ok(Self {
            negotiator: ServerNegotiator::new(config.session_options()),
            serializer: EnvelopeSerializer::default(),
            connection_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            listener,
            config,
        })
    }

    /// The bound address; useful when binding to port 0.
    pub fn local_addr(&self) -> ServerResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Connections that can still be accepted before the limit is hit.
    pub fn available_connections(&self) -> usize {
        self.connection_semaphore.available_permits()
    }

    /// Accepts one connection.
    ///
    /// Waits while `max_connections` connections are alive.
    pub async fn accept(&self) -> ServerResult<PendingConnection> {
        let permit = Arc::clone(&self.connection_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ServerError::Shutdown)?;

        let (stream, peer_addr) = self.listener.accept().await?;
        debug!(peer = %peer_addr, "Accepted connection");

        Ok(PendingConnection {
            transport: Arc::new(TcpTransport::from_stream(stream, self.serializer.clone())),
            peer_addr,
            channel_config: self.config.channel.clone(),
            negotiator: self.negotiator.clone(),
            permit,
        })
    }

    /// Accepts connections forever, establishing each in its own task and
    /// handing the established ones to `handler`.
    pub async fn run<H, Fut>(
        &self,
        authenticator: Arc<dyn Authenticator>,
        handler: H,
    ) -> ServerResult<()>
    where
        H: Fn(ServerConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        loop {
            let pending = match self.accept().await {
                Ok(pending) => pending,
                Err(ServerError::Shutdown) => return Err(ServerError::Shutdown),
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let authenticator = Arc::clone(&authenticator);
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let peer = pending.peer_addr();
                match pending.establish(authenticator.as_ref()).await {
                    Ok(connection) => (*handler)(connection).await,
                    Err(e) => warn!(peer = %peer, error = %e, "Session establishment failed"),
                }
            });
        }
    }

    /// Runs [`run`](Self::run) until `shutdown` completes.
    ///
    /// Connections already handed to `handler` keep running.
    pub async fn run_until_shutdown<H, Fut, S>(
        &self,
        authenticator: Arc<dyn Authenticator>,
        handler: H,
        shutdown: S,
    ) -> ServerResult<()>
    where
        H: Fn(ServerConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
        S: Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.run(authenticator, handler) => result,
            _ = shutdown => {
                info!("Shutdown signal received, no longer accepting");
                Ok(())
            }
        }
    }
}

/// An accepted socket whose session is not yet established.
pub struct PendingConnection {
    transport: Arc<TcpTransport>,
    peer_addr: SocketAddr,
    channel_config: ChannelConfig,
    negotiator: ServerNegotiator,
    permit: OwnedSemaphorePermit,
}

impl PendingConnection {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Runs the server negotiation on a new channel.
    ///
    /// On failure the channel is already failed and the transport closed.
    pub async fn establish(
        self,
        authenticator: &dyn Authenticator,
    ) -> ServerResult<ServerConnection> {
        let channel = Channel::new(self.transport, self.channel_config);
        let session = self.negotiator.establish(&channel, authenticator).await?;
        debug!(
            peer = %self.peer_addr,
            session_id = %session.session_id,
            remote = %session.remote_node,
            "Connection established"
        );

        Ok(ServerConnection {
            channel,
            session,
            peer_addr: self.peer_addr,
            _permit: self.permit,
        })
    }
}

/// An established server-side channel.
///
/// Holds one of the listener's connection slots until dropped.
pub struct ServerConnection {
    pub channel: Channel,
    pub session: EstablishedSession,
    pub peer_addr: SocketAddr,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConnection")
            .field("session", &self.session)
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}
