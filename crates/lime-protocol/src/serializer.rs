//! JSON envelope serializer.
//!
//! Settings are carried by an explicit [`SerializerConfig`] handed to each
//! [`EnvelopeSerializer`]; nothing is configured process-wide.

use lime_core::Envelope;
use serde_json::Value;

use crate::MAX_ENVELOPE_SIZE;
use crate::error::{ProtocolError, ProtocolResult};

/// Serializer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializerConfig {
    /// Emit indented JSON.
    pub pretty: bool,
    /// Largest serialized envelope accepted in either direction.
    pub max_envelope_size: u32,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            pretty: false,
            max_envelope_size: MAX_ENVELOPE_SIZE,
        }
    }
}

impl SerializerConfig {
    /// Builder: set pretty printing.
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    /// Builder: set the maximum envelope size.
    pub fn with_max_envelope_size(mut self, max: u32) -> Self {
        self.max_envelope_size = max;
        self
    }
}

/// Converts envelopes to and from their JSON text.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeSerializer {
    config: SerializerConfig,
}

impl EnvelopeSerializer {
    /// Creates a serializer with the given settings.
    pub fn new(config: SerializerConfig) -> Self {
        Self { config }
    }

    /// Returns the settings.
    pub fn config(&self) -> &SerializerConfig {
        &self.config
    }

    /// Serializes an envelope to JSON text.
    pub fn serialize(&self, envelope: &Envelope) -> ProtocolResult<String> {
        let json = if self.config.pretty {
            serde_json::to_string_pretty(envelope)?
        } else {
            serde_json::to_string(envelope)?
        };
        self.check_size(json.len())?;
        Ok(json)
    }

    /// Parses JSON text into an envelope.
    ///
    /// The kind is chosen by the first discriminant present, in the order
    /// `content`, `event`, `method`, `state`. Objects with none of them are
    /// rejected.
    pub fn deserialize(&self, json: &str) -> ProtocolResult<Envelope> {
        self.check_size(json.len())?;
        let value: Value = serde_json::from_str(json)?;
        Ok(Envelope::from_value(value)?)
    }

    /// Serializes an envelope to UTF-8 bytes.
    pub fn to_bytes(&self, envelope: &Envelope) -> ProtocolResult<Vec<u8>> {
        self.serialize(envelope).map(String::into_bytes)
    }

    /// Parses UTF-8 bytes into an envelope.
    pub fn from_bytes(&self, bytes: &[u8]) -> ProtocolResult<Envelope> {
        self.check_size(bytes.len())?;
        let value: Value = serde_json::from_slice(bytes)?;
        Ok(Envelope::from_value(value)?)
    }

    fn check_size(&self, len: usize) -> ProtocolResult<()> {
        if len > self.config.max_envelope_size as usize {
            return Err(ProtocolError::MessageTooLarge {
                size: u32::try_from(len).unwrap_or(u32::MAX),
                max: self.config.max_envelope_size,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lime_core::{
        Command, CommandMethod, CommandStatus, Document, Event, Message, Node, Reason, Session,
        SessionState,
    };

    fn serializer() -> EnvelopeSerializer {
        EnvelopeSerializer::default()
    }

    #[test]
    fn message_roundtrip() {
        let message = Message::new(Document::text("hi"))
            .with_id("1")
            .with_to(Node::parse("bob@example.org").unwrap());
        let envelope = Envelope::from(message);

        let json = serializer().serialize(&envelope).unwrap();
        assert_eq!(
            json,
            r#"{"id":"1","to":"bob@example.org","type":"text/plain","content":"hi"}"#
        );
        assert_eq!(serializer().deserialize(&json).unwrap(), envelope);
    }

    #[test]
    fn notification_with_reason() {
        let json = r#"{"id":"n1","event":"failed","reason":{"code":42,"description":"nope"}}"#;
        let Envelope::Notification(notification) = serializer().deserialize(json).unwrap() else {
            panic!("expected a notification");
        };
        assert_eq!(notification.event, Event::Failed);
        assert_eq!(notification.reason, Some(Reason::new(42, "nope")));

        let back = serializer()
            .serialize(&Envelope::Notification(notification))
            .unwrap();
        assert_eq!(back, json);
    }

    #[test]
    fn command_response_status() {
        let json = r#"{"id":"c1","method":"get","status":"success"}"#;
        let Envelope::Command(command) = serializer().deserialize(json).unwrap() else {
            panic!("expected a command");
        };
        assert_eq!(command.method, CommandMethod::Get);
        assert_eq!(command.status, CommandStatus::Success);
        assert!(command.uri.is_none());

        let request = Command::new(CommandMethod::Delete, "/contacts/bob");
        let json = serializer().serialize(&request.into()).unwrap();
        assert!(!json.contains("status"));
    }

    #[test]
    fn session_uses_camel_case_options() {
        let json = r#"{"state":"negotiating","compressionOptions":["none","gzip"],"encryptionOptions":["tls"]}"#;
        let Envelope::Session(session) = serializer().deserialize(json).unwrap() else {
            panic!("expected a session");
        };
        assert_eq!(session.state, SessionState::Negotiating);
        assert_eq!(session.compression_options.as_ref().map(Vec::len), Some(2));

        let json = serializer()
            .serialize(&Session::new(SessionState::New).into())
            .unwrap();
        assert_eq!(json, r#"{"state":"new"}"#);
    }

    #[test]
    fn rejects_object_without_discriminant() {
        let result = serializer().deserialize(r#"{"id":"1","from":"a@b.c"}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidEnvelope(_))));
    }

    #[test]
    fn rejects_malformed_json() {
        let result = serializer().deserialize("{not json");
        assert!(matches!(result, Err(ProtocolError::Serialization(_))));
    }

    #[test]
    fn rejects_unknown_enum_values() {
        let result = serializer().deserialize(r#"{"event":"exploded"}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidEnvelope(_))));
    }

    #[test]
    fn enforces_size_limit() {
        let serializer =
            EnvelopeSerializer::new(SerializerConfig::default().with_max_envelope_size(16));
        let envelope = Envelope::from(Message::new(Document::text("a long enough body")));
        assert!(matches!(
            serializer.serialize(&envelope),
            Err(ProtocolError::MessageTooLarge { max: 16, .. })
        ));
        assert!(matches!(
            serializer.from_bytes(br#"{"state":"new","id":"0123456789"}"#),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn pretty_output_still_parses() {
        let serializer = EnvelopeSerializer::new(SerializerConfig::default().with_pretty(true));
        let envelope = Envelope::from(Session::new(SessionState::Finishing).with_id("s"));
        let json = serializer.serialize(&envelope).unwrap();
        assert!(json.contains('\n'));
        assert_eq!(serializer.deserialize(&json).unwrap(), envelope);
    }
}
