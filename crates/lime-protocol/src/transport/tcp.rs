//! TCP transport carrying length-prefixed JSON envelopes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use lime_core::Envelope;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{Transport, TransportEvents, TransportStatus};
use crate::error::{ProtocolError, ProtocolResult};
use crate::framing::{FrameReader, FrameWriter};
use crate::serializer::EnvelopeSerializer;

/// URI scheme accepted by [`TcpTransport::open`].
pub const TCP_SCHEME: &str = "net.tcp://";

/// Envelopes read ahead of the consumer.
const READ_AHEAD: usize = 64;

/// Extracts `host:port` from `net.tcp://host:port[/...]` or `host:port`.
pub fn parse_tcp_uri(uri: &str) -> ProtocolResult<String> {
    let rest = uri.strip_prefix(TCP_SCHEME).unwrap_or(uri);
    if rest.contains("://") {
        return Err(ProtocolError::InvalidUri(uri.to_string()));
    }
    let authority = rest.split('/').next().unwrap_or_default();
    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(authority.to_string())
        }
        _ => Err(ProtocolError::InvalidUri(uri.to_string())),
    }
}

/// Envelope transport over a TCP stream.
///
/// A background task reads frames into a small queue so `receive` stays
/// cancel-safe; writes go straight to the socket.
pub struct TcpTransport {
    serializer: EnvelopeSerializer,
    writer: Mutex<Option<FrameWriter<OwnedWriteHalf>>>,
    incoming: Mutex<Option<mpsc::Receiver<ProtocolResult<Envelope>>>>,
    reader: StdMutex<Option<JoinHandle<()>>>,
    peer_addr: StdMutex<Option<SocketAddr>>,
    closed_locally: AtomicBool,
    events: Arc<TransportEvents>,
}

impl TcpTransport {
    /// Creates an unopened transport; call [`Transport::open`] to connect.
    pub fn new(serializer: EnvelopeSerializer) -> Self {
        Self {
            serializer,
            writer: Mutex::new(None),
            incoming: Mutex::new(None),
            reader: StdMutex::new(None),
            peer_addr: StdMutex::new(None),
            closed_locally: AtomicBool::new(false),
            events: Arc::new(TransportEvents::default()),
        }
    }

    /// Wraps an accepted stream. Must be called inside a tokio runtime.
    pub fn from_stream(stream: TcpStream, serializer: EnvelopeSerializer) -> Self {
        let transport = Self::new(serializer);
        transport.attach(stream);
        transport
    }

    /// Address of the remote end, once connected.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer_addr.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn attach(&self, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "Failed to set TCP_NODELAY");
        }
        let peer = stream.peer_addr().ok();
        let (read_half, write_half) = stream.into_split();
        let max = self.serializer.config().max_envelope_size;

        let (tx, rx) = mpsc::channel(READ_AHEAD);
        let reader = FrameReader::with_limit(read_half, max);
        let task = tokio::spawn(read_loop(
            reader,
            self.serializer.clone(),
            tx,
            Arc::clone(&self.events),
        ));

        *self.peer_addr.lock().unwrap_or_else(|e| e.into_inner()) = peer;
        *self.reader.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
        // Not contended before the transport is connected.
        if let Ok(mut writer) = self.writer.try_lock() {
            *writer = Some(FrameWriter::with_limit(write_half, max));
        }
        if let Ok(mut incoming) = self.incoming.try_lock() {
            *incoming = Some(rx);
        }
        self.events.mark_connected();
        debug!(peer = ?peer, "TCP transport connected");
    }

    fn closed_error(&self) -> ProtocolError {
        match self.events.status() {
            TransportStatus::Failed(message) => ProtocolError::TransportFailed(message),
            _ => ProtocolError::ConnectionClosed,
        }
    }
}

async fn read_loop(
    mut reader: FrameReader<tokio::net::tcp::OwnedReadHalf>,
    serializer: EnvelopeSerializer,
    tx: mpsc::Sender<ProtocolResult<Envelope>>,
    events: Arc<TransportEvents>,
) {
    loop {
        let result = match reader.read_frame().await {
            Ok(Some(frame)) => serializer.from_bytes(&frame),
            Ok(None) => {
                debug!("TCP peer closed the connection");
                events.mark_closed();
                return;
            }
            Err(e) if e.is_connection_closed() => {
                debug!(error = %e, "TCP connection closed");
                events.mark_closed();
                return;
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(envelope) => {
                trace!(kind = %envelope.kind(), id = ?envelope.id(), "Received envelope");
                if tx.send(Ok(envelope)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read envelope");
                events.mark_failed(e.to_string());
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self, uri: &str) -> ProtocolResult<()> {
        match self.events.status() {
            TransportStatus::Idle => {}
            TransportStatus::Connected => {
                return Err(ProtocolError::TransportFailed(
                    "transport is already open".to_string(),
                ));
            }
            _ => return Err(self.closed_error()),
        }

        let addr = parse_tcp_uri(uri)?;
        debug!(addr = %addr, "Connecting TCP transport");
        let stream = TcpStream::connect(&addr).await?;
        self.attach(stream);
        Ok(())
    }

    async fn send(&self, envelope: &Envelope) -> ProtocolResult<()> {
        if self.events.status().is_terminal() {
            return Err(self.closed_error());
        }
        let bytes = self.serializer.to_bytes(envelope)?;

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ProtocolError::NotConnected)?;
        if let Err(e) = writer.write_frame(&bytes).await {
            if e.is_connection_closed() {
                self.events.mark_closed();
            } else {
                self.events.mark_failed(e.to_string());
            }
            return Err(e);
        }
        trace!(kind = %envelope.kind(), id = ?envelope.id(), "Sent envelope");
        Ok(())
    }

    async fn receive(&self) -> ProtocolResult<Envelope> {
        if self.closed_locally.load(Ordering::Acquire) {
            return Err(ProtocolError::ConnectionClosed);
        }
        let mut incoming = self.incoming.lock().await;
        let incoming = incoming.as_mut().ok_or(ProtocolError::NotConnected)?;
        match incoming.recv().await {
            Some(result) => result,
            None => Err(self.closed_error()),
        }
    }

    async fn close(&self) -> ProtocolResult<()> {
        if self.closed_locally.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.events.run_closing_hooks().await;

        let task = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.abort();
        }

        let writer = self.writer.lock().await.take();
        let result = match writer {
            Some(mut writer) => writer.shutdown().await,
            None => Ok(()),
        };
        self.events.mark_closed();
        debug!(peer = ?self.peer_addr(), "TCP transport closed");

        match result {
            Err(e) if !e.is_connection_closed() => Err(e),
            _ => Ok(()),
        }
    }

    fn events(&self) -> &TransportEvents {
        &self.events
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer_addr", &self.peer_addr())
            .field("status", &self.events.status())
            .finish()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(task) = self.reader.lock().unwrap_or_else(|e| e.into_inner()).take() {
            task.abort();
        }
    }
}
