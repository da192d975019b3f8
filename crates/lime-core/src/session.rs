//! Session state and negotiation option types.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::error::EnvelopeError;

/// State of a session, as carried by `Session` envelopes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Session has been requested but not negotiated yet.
    #[default]
    New,
    /// Transport options are being negotiated.
    Negotiating,
    /// Credentials are being exchanged.
    Authenticating,
    /// Session is active.
    Established,
    /// One side requested termination.
    Finishing,
    /// Session terminated normally.
    Finished,
    /// Session terminated with an error.
    Failed,
}

impl SessionState {
    /// True for `Finished` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// True while the handshake is still running.
    pub fn is_negotiation(&self) -> bool {
        matches!(self, Self::New | Self::Negotiating | Self::Authenticating)
    }

    /// Validates a state transition.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        match (self, next) {
            (New, Negotiating | Authenticating | Established | Failed) => true,
            (Negotiating, Negotiating | Authenticating | Established | Failed) => true,
            (Authenticating, Authenticating | Established | Failed) => true,
            (Established, Finishing | Finished | Failed) => true,
            (Finishing, Finished | Failed) => true,
            _ => false,
        }
    }

    /// Lowercase wire name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Negotiating => "negotiating",
            Self::Authenticating => "authenticating",
            Self::Established => "established",
            Self::Finishing => "finishing",
            Self::Finished => "finished",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport compression options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionCompression {
    #[default]
    None,
    GZip,
}

impl fmt::Display for SessionCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::GZip => f.write_str("gzip"),
        }
    }
}

/// Transport encryption options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionEncryption {
    #[default]
    None,
    Tls,
}

impl fmt::Display for SessionEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Tls => f.write_str("tls"),
        }
    }
}

/// Authentication schemes a server may offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticationScheme {
    Guest,
    Plain,
    Key,
    Transport,
    External,
}

impl fmt::Display for AuthenticationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Guest => "guest",
            Self::Plain => "plain",
            Self::Key => "key",
            Self::Transport => "transport",
            Self::External => "external",
        };
        f.write_str(name)
    }
}

/// Credentials presented during the authenticating phase.
///
/// Secrets are kept decoded in memory and base64-encoded on the wire.
#[derive(Clone, PartialEq, Eq)]
pub enum Authentication {
    Guest,
    Plain { password: String },
    Key { key: String },
    Transport,
    External { token: String, issuer: String },
}

impl Authentication {
    /// Creates plain (password) credentials.
    pub fn plain(password: impl Into<String>) -> Self {
        Self::Plain {
            password: password.into(),
        }
    }

    /// Creates key credentials.
    pub fn key(key: impl Into<String>) -> Self {
        Self::Key { key: key.into() }
    }

    /// Creates external token credentials.
    pub fn external(token: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self::External {
            token: token.into(),
            issuer: issuer.into(),
        }
    }

    /// Returns the scheme these credentials belong to.
    pub fn scheme(&self) -> AuthenticationScheme {
        match self {
            Self::Guest => AuthenticationScheme::Guest,
            Self::Plain { .. } => AuthenticationScheme::Plain,
            Self::Key { .. } => AuthenticationScheme::Key,
            Self::Transport => AuthenticationScheme::Transport,
            Self::External { .. } => AuthenticationScheme::External,
        }
    }

    /// Encodes the credentials as their wire object.
    pub fn to_wire(&self) -> Value {
        match self {
            Self::Guest | Self::Transport => Value::Object(Map::new()),
            Self::Plain { password } => json!({ "password": STANDARD.encode(password) }),
            Self::Key { key } => json!({ "key": STANDARD.encode(key) }),
            Self::External { token, issuer } => json!({ "token": token, "issuer": issuer }),
        }
    }

    /// Decodes credentials of the given scheme from their wire object.
    pub fn from_wire(scheme: AuthenticationScheme, value: &Value) -> Result<Self, EnvelopeError> {
        let field = |name: &str| -> Result<String, EnvelopeError> {
            value
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    EnvelopeError::invalid_authentication(scheme, format!("missing {}", name))
                })
        };
        let decode = |encoded: String| -> Result<String, EnvelopeError> {
            let bytes = STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| EnvelopeError::invalid_authentication(scheme, e.to_string()))?;
            String::from_utf8(bytes)
                .map_err(|e| EnvelopeError::invalid_authentication(scheme, e.to_string()))
        };

        match scheme {
            AuthenticationScheme::Guest => Ok(Self::Guest),
            AuthenticationScheme::Transport => Ok(Self::Transport),
            AuthenticationScheme::Plain => Ok(Self::Plain {
                password: decode(field("password")?)?,
            }),
            AuthenticationScheme::Key => Ok(Self::Key {
                key: decode(field("key")?)?,
            }),
            AuthenticationScheme::External => Ok(Self::External {
                token: field("token")?,
                issuer: field("issuer")?,
            }),
        }
    }
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Guest => f.write_str("Guest"),
            Self::Transport => f.write_str("Transport"),
            Self::Plain { .. } => f.debug_struct("Plain").field("password", &"***").finish(),
            Self::Key { .. } => f.debug_struct("Key").field("key", &"***").finish(),
            Self::External { issuer, .. } => f
                .debug_struct("External")
                .field("token", &"***")
                .field("issuer", issuer)
                .finish(),
        }
    }
}

/// Authorization level resolved for an authenticated identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DomainRole {
    #[default]
    Unknown,
    Member,
    Authority,
    RootAuthority,
}
