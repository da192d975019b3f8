//! Core types: identities, envelopes, the async queue, tracing setup.
//!
//! This crate holds the value types every other Lime crate exchanges and
//! the [`AsyncQueue`] used to hand envelopes from a channel's receive pump
//! to its consumers.

pub mod document;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod queue;
pub mod session;
pub mod tracing;

pub use document::{Document, DocumentContent, MediaType};
pub use envelope::{
    Command, CommandMethod, CommandStatus, Envelope, EnvelopeHeader, EnvelopeKind, Event, Message,
    Notification, Reason, Session, new_envelope_id, reason_codes,
};
pub use error::{EnvelopeError, EnvelopeResult};
pub use identity::{Identity, Node};
pub use queue::{AsyncQueue, QueueError, Receive};
pub use session::{
    Authentication, AuthenticationScheme, DomainRole, SessionCompression, SessionEncryption,
    SessionState,
};
pub use self::tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};
