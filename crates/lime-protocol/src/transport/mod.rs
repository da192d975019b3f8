//! The transport contract consumed by channels.
//!
//! A transport moves whole envelopes over one ordered connection. Channels
//! own their transport exclusively and only ever have one task reading from
//! it, while sends are serialized by the channel.

mod events;
mod memory;
mod tcp;

use async_trait::async_trait;
use lime_core::{Envelope, SessionCompression, SessionEncryption};

use crate::error::{ProtocolError, ProtocolResult};

pub use events::{ClosingHook, TransportEvents, TransportStatus};
pub use memory::InMemoryTransport;
pub use tcp::{TCP_SCHEME, TcpTransport, parse_tcp_uri};

/// Envelope transport.
///
/// The option methods have defaults describing a transport without any
/// compression or encryption support.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connects to the given address.
    async fn open(&self, uri: &str) -> ProtocolResult<()>;

    /// Writes one envelope.
    async fn send(&self, envelope: &Envelope) -> ProtocolResult<()>;

    /// Reads the next envelope.
    ///
    /// Fails with [`ProtocolError::ConnectionClosed`] once the transport is
    /// closed. Must be cancel-safe.
    async fn receive(&self) -> ProtocolResult<Envelope>;

    /// Runs the closing hooks, then closes the connection.
    async fn close(&self) -> ProtocolResult<()>;

    fn supported_compression(&self) -> Vec<SessionCompression> {
        vec![SessionCompression::None]
    }

    fn supported_encryption(&self) -> Vec<SessionEncryption> {
        vec![SessionEncryption::None]
    }

    fn compression(&self) -> SessionCompression {
        SessionCompression::None
    }

    fn encryption(&self) -> SessionEncryption {
        SessionEncryption::None
    }

    /// Applies a compression option. Completes before any further envelope
    /// is sent or received.
    async fn set_compression(&self, compression: SessionCompression) -> ProtocolResult<()> {
        if compression == SessionCompression::None {
            Ok(())
        } else {
            Err(ProtocolError::unsupported("compression", compression))
        }
    }

    /// Applies an encryption option. Completes before any further envelope
    /// is sent or received.
    async fn set_encryption(&self, encryption: SessionEncryption) -> ProtocolResult<()> {
        if encryption == SessionEncryption::None {
            Ok(())
        } else {
            Err(ProtocolError::unsupported("encryption", encryption))
        }
    }

    fn is_connected(&self) -> bool {
        self.events().status() == TransportStatus::Connected
    }

    /// Lifecycle hooks and status.
    fn events(&self) -> &TransportEvents;
}
