//! Envelope serialization, stream framing and the transport contract.
//!
//! # Wire format
//!
//! Stream transports carry each envelope as length-prefixed JSON:
//! - 4 bytes: payload length (u32, big-endian)
//! - N bytes: the envelope as a JSON object
//!
//! The envelope kind is not tagged explicitly; it is recovered from the
//! first discriminant field present (`content`, `event`, `method`, `state`).
//!
//! # Example
//!
//! ```rust
//! use lime_core::{Envelope, Session, SessionState};
//! use lime_protocol::EnvelopeSerializer;
//!
//! let serializer = EnvelopeSerializer::default();
//! let json = serializer.serialize(&Session::new(SessionState::New).into()).unwrap();
//! let decoded: Envelope = serializer.deserialize(&json).unwrap();
//! assert!(matches!(decoded, Envelope::Session(_)));
//! ```

mod error;
mod framing;
mod serializer;
pub mod transport;

pub use error::{ProtocolError, ProtocolResult};
pub use framing::{FrameReader, FrameWriter, decode_frame, encode_frame};
pub use serializer::{EnvelopeSerializer, SerializerConfig};
pub use transport::{
    InMemoryTransport, TCP_SCHEME, TcpTransport, Transport, TransportEvents, TransportStatus,
    parse_tcp_uri,
};

/// Maximum serialized envelope size (1 MB).
pub const MAX_ENVELOPE_SIZE: u32 = 1024 * 1024;
