//! The four Lime envelope kinds and their wire representation.
//!
//! Every envelope shares a header (`id`, `from`, `to`, `pp`, `metadata`)
//! and adds its own fields. On the wire the kind is not tagged explicitly;
//! a reader tells them apart by the presence of a discriminant property:
//!
//! | property  | envelope       |
//! |-----------|----------------|
//! | `content` | [`Message`]    |
//! | `event`   | [`Notification`] |
//! | `method`  | [`Command`]    |
//! | `state`   | [`Session`]    |

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::document::{Document, MediaType};
use crate::error::EnvelopeError;
use crate::identity::Node;
use crate::session::{
    Authentication, AuthenticationScheme, SessionCompression, SessionEncryption, SessionState,
};

/// Reason codes used in notifications, commands and sessions.
pub mod reason_codes {
    pub const GENERAL_ERROR: i32 = 1;
    pub const SESSION_ERROR: i32 = 11;
    pub const SESSION_REGISTRATION_ERROR: i32 = 12;
    pub const SESSION_AUTHENTICATION_FAILED: i32 = 13;
    pub const SESSION_UNREGISTER_FAILED: i32 = 14;
    pub const SESSION_INVALID_ACTION_FOR_STATE: i32 = 15;
    pub const SESSION_NEGOTIATION_TIMEOUT: i32 = 16;
    pub const SESSION_NEGOTIATION_INVALID_OPTIONS: i32 = 17;
    pub const SESSION_INVALID_SESSION_MODE: i32 = 18;
    pub const VALIDATION_ERROR: i32 = 21;
    pub const COMMAND_PROCESSING_ERROR: i32 = 61;
    pub const COMMAND_RESOURCE_NOT_FOUND: i32 = 67;
}

/// Generates a fresh envelope id.
pub fn new_envelope_id() -> String {
    Uuid::new_v4().to_string()
}

/// Failure or status reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    /// Numeric reason code, see [`reason_codes`].
    pub code: i32,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Reason {
    /// Creates a reason with a description.
    pub fn new(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: Some(description.into()),
        }
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{} (code {})", description, self.code),
            None => write!(f, "code {}", self.code),
        }
    }
}

/// Fields shared by every envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeHeader {
    /// Correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Originator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Node>,
    /// Destination.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Node>,
    /// Node acting on behalf of `from`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pp: Option<Node>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl EnvelopeHeader {
    /// Creates a header with the given id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }
}

/// Implements the shared header builders for an envelope type.
macro_rules! header_builders {
    ($ty:ty) => {
        impl $ty {
            /// Builder: set the id.
            pub fn with_id(mut self, id: impl Into<String>) -> Self {
                self.header.id = Some(id.into());
                self
            }

            /// Builder: set the originator.
            pub fn with_from(mut self, from: Node) -> Self {
                self.header.from = Some(from);
                self
            }

            /// Builder: set the destination.
            pub fn with_to(mut self, to: Node) -> Self {
                self.header.to = Some(to);
                self
            }

            /// Builder: set the on-behalf-of node.
            pub fn with_pp(mut self, pp: Node) -> Self {
                self.header.pp = Some(pp);
                self
            }

            /// Builder: add a metadata entry.
            pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
                self.header.metadata.insert(key.into(), value.into());
                self
            }

            /// Returns the id, if any.
            pub fn id(&self) -> Option<&str> {
                self.header.id.as_deref()
            }
        }
    };
}

/// A message carrying a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    #[serde(flatten)]
    pub content: Document,
}

impl Message {
    /// Creates a message with the given content.
    pub fn new(content: Document) -> Self {
        Self {
            header: EnvelopeHeader::default(),
            content,
        }
    }
}

header_builders!(Message);

/// Events reported by notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    Accepted,
    Dispatched,
    Received,
    Consumed,
    Failed,
}

/// A notification about the processing of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    pub event: Event,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Notification {
    /// Creates a notification for the given event.
    pub fn new(event: Event) -> Self {
        Self {
            header: EnvelopeHeader::default(),
            event,
            reason: None,
        }
    }

    /// Creates a `failed` notification with a reason.
    pub fn failed(reason: Reason) -> Self {
        Self {
            reason: Some(reason),
            ..Self::new(Event::Failed)
        }
    }
}

header_builders!(Notification);

/// Command methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandMethod {
    Get,
    Set,
    Delete,
    Subscribe,
    Unsubscribe,
    Observe,
}

/// Command status. Requests are `Pending`, responses are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    #[default]
    Pending,
    Success,
    Failure,
}

impl CommandStatus {
    /// True for the request status.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// A request or response over a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    pub method: CommandMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<Value>,
    #[serde(default, skip_serializing_if = "CommandStatus::is_pending")]
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Command {
    /// Creates a pending command for the given method and uri.
    pub fn new(method: CommandMethod, uri: impl Into<String>) -> Self {
        Self {
            header: EnvelopeHeader::default(),
            method,
            uri: Some(uri.into()),
            media_type: None,
            resource: None,
            status: CommandStatus::Pending,
            reason: None,
        }
    }

    /// Builder: attach a resource document.
    pub fn with_resource(mut self, resource: Document) -> Self {
        self.resource = Some(resource.to_wire());
        self.media_type = Some(resource.media_type);
        self
    }

    /// Returns the typed resource document, if present.
    pub fn resource_document(&self) -> Result<Option<Document>, EnvelopeError> {
        match (&self.media_type, &self.resource) {
            (Some(media_type), Some(value)) => {
                Document::from_wire(media_type.clone(), value.clone()).map(Some)
            }
            (None, Some(_)) => Err(EnvelopeError::InvalidDocument {
                media_type: String::new(),
                message: "resource without type".into(),
            }),
            _ => Ok(None),
        }
    }

    /// Builds a success response to this command, swapping `from` and `to`.
    pub fn success_response(&self) -> Self {
        self.response(CommandStatus::Success, None)
    }

    /// Builds a failure response to this command, swapping `from` and `to`.
    pub fn failure_response(&self, reason: Reason) -> Self {
        self.response(CommandStatus::Failure, Some(reason))
    }

    fn response(&self, status: CommandStatus, reason: Option<Reason>) -> Self {
        Self {
            header: EnvelopeHeader {
                id: self.header.id.clone(),
                from: self.header.to.clone(),
                to: self.header.from.clone(),
                pp: None,
                metadata: BTreeMap::new(),
            },
            method: self.method,
            uri: None,
            media_type: None,
            resource: None,
            status,
            reason,
        }
    }
}

header_builders!(Command);

/// A session negotiation envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(flatten)]
    pub header: EnvelopeHeader,
    pub state: SessionState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_options: Option<Vec<SessionEncryption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<SessionEncryption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_options: Option<Vec<SessionCompression>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<SessionCompression>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme_options: Option<Vec<AuthenticationScheme>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<AuthenticationScheme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
}

impl Session {
    /// Creates a session envelope in the given state.
    pub fn new(state: SessionState) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    /// Creates a `failed` session with a reason.
    pub fn failed(reason: Reason) -> Self {
        Self {
            reason: Some(reason),
            ..Self::new(SessionState::Failed)
        }
    }

    /// Builder: attach credentials, setting the scheme accordingly.
    pub fn with_authentication(mut self, authentication: &Authentication) -> Self {
        self.scheme = Some(authentication.scheme());
        self.authentication = Some(authentication.to_wire());
        self
    }

    /// Decodes the credentials using the declared scheme.
    ///
    /// A missing scheme defaults to `guest`, matching clients that omit it.
    pub fn authentication(&self) -> Result<Option<Authentication>, EnvelopeError> {
        let Some(value) = &self.authentication else {
            return Ok(None);
        };
        let scheme = self.scheme.unwrap_or(AuthenticationScheme::Guest);
        Authentication::from_wire(scheme, value).map(Some)
    }
}

header_builders!(Session);

/// Any of the four envelope kinds.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Message(Message),
    Notification(Notification),
    Command(Command),
    Session(Session),
}

impl Envelope {
    /// Decodes an envelope from a JSON value by sniffing its discriminant.
    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let Value::Object(object) = value else {
            return Err(EnvelopeError::InvalidEnvelope(
                "envelope must be a JSON object".into(),
            ));
        };

        let kind = EnvelopeKind::sniff(&object).ok_or_else(|| {
            EnvelopeError::InvalidEnvelope(
                "missing content, event, method or state property".into(),
            )
        })?;

        let value = Value::Object(object);
        let invalid = |e: serde_json::Error| EnvelopeError::InvalidEnvelope(e.to_string());
        let envelope = match kind {
            EnvelopeKind::Message => Self::Message(serde_json::from_value(value).map_err(invalid)?),
            EnvelopeKind::Notification => {
                Self::Notification(serde_json::from_value(value).map_err(invalid)?)
            }
            EnvelopeKind::Command => Self::Command(serde_json::from_value(value).map_err(invalid)?),
            EnvelopeKind::Session => Self::Session(serde_json::from_value(value).map_err(invalid)?),
        };
        Ok(envelope)
    }

    /// Returns the kind of this envelope.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Message(_) => EnvelopeKind::Message,
            Self::Notification(_) => EnvelopeKind::Notification,
            Self::Command(_) => EnvelopeKind::Command,
            Self::Session(_) => EnvelopeKind::Session,
        }
    }

    /// Returns the shared header.
    pub fn header(&self) -> &EnvelopeHeader {
        match self {
            Self::Message(m) => &m.header,
            Self::Notification(n) => &n.header,
            Self::Command(c) => &c.header,
            Self::Session(s) => &s.header,
        }
    }

    /// Returns the id, if any.
    pub fn id(&self) -> Option<&str> {
        self.header().id.as_deref()
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        Self::Message(message)
    }
}

impl From<Notification> for Envelope {
    fn from(notification: Notification) -> Self {
        Self::Notification(notification)
    }
}

impl From<Command> for Envelope {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

impl From<Session> for Envelope {
    fn from(session: Session) -> Self {
        Self::Session(session)
    }
}

/// Discriminant of an [`Envelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Message,
    Notification,
    Command,
    Session,
}

impl EnvelopeKind {
    /// Detects the envelope kind from the properties of a JSON object.
    pub fn sniff(object: &Map<String, Value>) -> Option<Self> {
        if object.contains_key("content") {
            Some(Self::Message)
        } else if object.contains_key("event") {
            Some(Self::Notification)
        } else if object.contains_key("method") {
            Some(Self::Command)
        } else if object.contains_key("state") {
            Some(Self::Session)
        } else {
            None
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Message => "message",
            Self::Notification => "notification",
            Self::Command => "command",
            Self::Session => "session",
        };
        f.write_str(name)
    }
}
