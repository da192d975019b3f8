//! Media types and opaque documents.
//!
//! A [`Document`] is the payload of a message or a command resource. The
//! channel never looks inside it; only the media type matters because it
//! decides whether the wire form is a JSON value or a raw string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::EnvelopeError;

/// A MIME media type such as `application/vnd.lime.presence+json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaType {
    /// Top-level type (`text`, `application`, ...).
    pub kind: String,
    /// Subtype without the suffix.
    pub subtype: String,
    /// Structured syntax suffix (`json`, `xml`, ...).
    pub suffix: Option<String>,
}

impl MediaType {
    /// Creates a media type.
    pub fn new(kind: impl Into<String>, subtype: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            subtype: subtype.into(),
            suffix: None,
        }
    }

    /// Builder: set the suffix.
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }

    /// `text/plain`.
    pub fn text_plain() -> Self {
        Self::new("text", "plain")
    }

    /// `application/json`.
    pub fn application_json() -> Self {
        Self::new("application", "json")
    }

    /// Parses a media type string. Parameters after `;` are ignored.
    pub fn parse(s: &str) -> Result<Self, EnvelopeError> {
        let essence = s.split(';').next().unwrap_or_default().trim();
        let Some((kind, rest)) = essence.split_once('/') else {
            return Err(EnvelopeError::InvalidMediaType(s.to_string()));
        };
        if kind.is_empty() || rest.is_empty() || rest.contains('/') {
            return Err(EnvelopeError::InvalidMediaType(s.to_string()));
        }

        let (subtype, suffix) = match rest.split_once('+') {
            Some((subtype, suffix)) if !subtype.is_empty() && !suffix.is_empty() => {
                (subtype, Some(suffix.to_ascii_lowercase()))
            }
            Some(_) => return Err(EnvelopeError::InvalidMediaType(s.to_string())),
            None => (rest, None),
        };

        Ok(Self {
            kind: kind.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            suffix,
        })
    }

    /// True when the serialized form of documents of this type is JSON.
    pub fn is_json(&self) -> bool {
        self.suffix.as_deref() == Some("json") || self.subtype == "json"
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.subtype)?;
        if let Some(suffix) = &self.suffix {
            write!(f, "+{}", suffix)?;
        }
        Ok(())
    }
}

impl FromStr for MediaType {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for MediaType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Document body as carried on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentContent {
    /// JSON value, for JSON media types.
    Json(Value),
    /// Raw text, for every other media type.
    Text(String),
}

/// An opaque payload tagged with its media type.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Media type of the content.
    pub media_type: MediaType,
    /// The content itself.
    pub content: DocumentContent,
}

impl Document {
    /// Creates a `text/plain` document.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            media_type: MediaType::text_plain(),
            content: DocumentContent::Text(text.into()),
        }
    }

    /// Creates a JSON document of the given media type.
    pub fn json(media_type: MediaType, value: Value) -> Self {
        Self {
            media_type,
            content: DocumentContent::Json(value),
        }
    }

    /// Builds a document from its wire parts.
    pub fn from_wire(media_type: MediaType, value: Value) -> Result<Self, EnvelopeError> {
        if media_type.is_json() {
            return Ok(Self::json(media_type, value));
        }
        match value {
            Value::String(text) => Ok(Self {
                media_type,
                content: DocumentContent::Text(text),
            }),
            other => Err(EnvelopeError::invalid_document(
                &media_type,
                format!("expected a string, got {}", json_kind(&other)),
            )),
        }
    }

    /// Returns the wire value of the content.
    pub fn to_wire(&self) -> Value {
        match &self.content {
            DocumentContent::Json(value) => value.clone(),
            DocumentContent::Text(text) => Value::String(text.clone()),
        }
    }

    /// Returns the text content, if this is a text document.
    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            DocumentContent::Text(text) => Some(text),
            DocumentContent::Json(_) => None,
        }
    }

    /// Returns the JSON content, if this is a JSON document.
    pub fn as_json(&self) -> Option<&Value> {
        match &self.content {
            DocumentContent::Json(value) => Some(value),
            DocumentContent::Text(_) => None,
        }
    }
}

/// Wire shape of a message body: `{"type": ..., "content": ...}`.
#[derive(Serialize, Deserialize)]
struct DocumentWire {
    #[serde(rename = "type")]
    media_type: MediaType,
    content: Value,
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        DocumentWire {
            media_type: self.media_type.clone(),
            content: self.to_wire(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = DocumentWire::deserialize(deserializer)?;
        Self::from_wire(wire.media_type, wire.content).map_err(serde::de::Error::custom)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
