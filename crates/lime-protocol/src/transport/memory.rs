//! In-process transport pair, for tests and same-process peers.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use lime_core::{Envelope, SessionCompression, SessionEncryption};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace};

use super::{Transport, TransportEvents, TransportStatus};
use crate::error::{ProtocolError, ProtocolResult};

/// One end of a connected in-memory transport pair.
///
/// Envelopes are handed over as values; nothing is serialized. Compression
/// and encryption are only recorded, so negotiation can be exercised
/// against any offered set.
pub struct InMemoryTransport {
    outgoing: StdMutex<Option<mpsc::Sender<Envelope>>>,
    incoming: Mutex<mpsc::Receiver<Envelope>>,
    compression_options: Vec<SessionCompression>,
    encryption_options: Vec<SessionEncryption>,
    compression: StdMutex<SessionCompression>,
    encryption: StdMutex<SessionEncryption>,
    closed_locally: AtomicBool,
    events: TransportEvents,
}

impl InMemoryTransport {
    /// Creates two connected transports, each buffering up to `capacity`
    /// envelopes sent by the other.
    pub fn pair(capacity: usize) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(capacity.max(1));
        let (b_tx, a_rx) = mpsc::channel(capacity.max(1));
        (Self::new(a_tx, a_rx), Self::new(b_tx, b_rx))
    }

    fn new(outgoing: mpsc::Sender<Envelope>, incoming: mpsc::Receiver<Envelope>) -> Self {
        Self {
            outgoing: StdMutex::new(Some(outgoing)),
            incoming: Mutex::new(incoming),
            compression_options: vec![SessionCompression::None],
            encryption_options: vec![SessionEncryption::None],
            compression: StdMutex::new(SessionCompression::None),
            encryption: StdMutex::new(SessionEncryption::None),
            closed_locally: AtomicBool::new(false),
            events: TransportEvents::new(TransportStatus::Connected),
        }
    }

    /// Builder: compression options this end supports.
    pub fn with_compression_options(mut self, options: Vec<SessionCompression>) -> Self {
        self.compression_options = options;
        self
    }

    /// Builder: encryption options this end supports.
    pub fn with_encryption_options(mut self, options: Vec<SessionEncryption>) -> Self {
        self.encryption_options = options;
        self
    }

    /// Injects a transport fault.
    ///
    /// Receives on this end fail with `TransportFailed`; the peer sees the
    /// connection close.
    pub fn fail(&self, message: impl Into<String>) {
        let message = message.into();
        debug!(message = %message, "Injecting in-memory transport fault");
        self.events.mark_failed(message);
        self.outgoing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
    }

    fn terminal_error(&self) -> ProtocolError {
        match self.events.status() {
            TransportStatus::Failed(message) => ProtocolError::TransportFailed(message),
            _ => ProtocolError::ConnectionClosed,
        }
    }

    fn sender(&self) -> ProtocolResult<mpsc::Sender<Envelope>> {
        if self.events.status().is_terminal() {
            return Err(self.terminal_error());
        }
        self.outgoing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ProtocolError::ConnectionClosed)
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn open(&self, _uri: &str) -> ProtocolResult<()> {
        if self.events.status().is_terminal() {
            return Err(self.terminal_error());
        }
        Ok(())
    }

    async fn send(&self, envelope: &Envelope) -> ProtocolResult<()> {
        let sender = self.sender()?;
        sender
            .send(envelope.clone())
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        trace!(kind = %envelope.kind(), id = ?envelope.id(), "Sent in-memory envelope");
        Ok(())
    }

    async fn receive(&self) -> ProtocolResult<Envelope> {
        if self.closed_locally.load(Ordering::Acquire) || self.events.status().is_terminal() {
            return Err(self.terminal_error());
        }
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            biased;
            _ = self.events.wait_terminal() => Err(self.terminal_error()),
            received = incoming.recv() => match received {
                Some(envelope) => Ok(envelope),
                None => {
                    self.events.mark_closed();
                    Err(self.terminal_error())
                }
            },
        }
    }

    async fn close(&self) -> ProtocolResult<()> {
        if self.closed_locally.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.events.run_closing_hooks().await;
        self.outgoing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        self.events.mark_closed();
        // The mark above releases a receive in progress, so the lock is free soon.
        self.incoming.lock().await.close();
        debug!("In-memory transport closed");
        Ok(())
    }

    fn supported_compression(&self) -> Vec<SessionCompression> {
        self.compression_options.clone()
    }

    fn supported_encryption(&self) -> Vec<SessionEncryption> {
        self.encryption_options.clone()
    }

    fn compression(&self) -> SessionCompression {
        *self.compression.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn encryption(&self) -> SessionEncryption {
        *self.encryption.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn set_compression(&self, compression: SessionCompression) -> ProtocolResult<()> {
        if !self.compression_options.contains(&compression) {
            return Err(ProtocolError::unsupported("compression", compression));
        }
        *self.compression.lock().unwrap_or_else(|e| e.into_inner()) = compression;
        Ok(())
    }

    async fn set_encryption(&self, encryption: SessionEncryption) -> ProtocolResult<()> {
        if !self.encryption_options.contains(&encryption) {
            return Err(ProtocolError::unsupported("encryption", encryption));
        }
        *self.encryption.lock().unwrap_or_else(|e| e.into_inner()) = encryption;
        Ok(())
    }

    fn events(&self) -> &TransportEvents {
        &self.events
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("status", &self.events.status())
            .field("compression", &self.compression())
            .field("encryption", &self.encryption())
            .finish()
    }
}
