//! Identities and nodes.
//!
//! An [`Identity`] is a `name@domain` pair and a [`Node`] adds the
//! connection instance (`name@domain/instance`). Both compare
//! case-insensitively and travel as plain strings on the wire.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::EnvelopeError;

/// A `name@domain` pair identifying an account.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    /// Account name. May be empty for domain-only identities.
    pub name: String,
    /// Domain the account belongs to.
    pub domain: String,
}

impl Identity {
    /// Creates a new identity.
    pub fn new(name: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: domain.into(),
        }
    }

    /// Parses an identity from its `name@domain` form.
    pub fn parse(s: &str) -> Result<Self, EnvelopeError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EnvelopeError::InvalidIdentity("empty identity".into()));
        }
        if s.contains('/') {
            return Err(EnvelopeError::InvalidIdentity(s.to_string()));
        }

        match s.split_once('@') {
            Some((name, domain)) => {
                if domain.contains('@') {
                    return Err(EnvelopeError::InvalidIdentity(s.to_string()));
                }
                Ok(Self::new(name, domain))
            }
            None => Ok(Self::new(s, "")),
        }
    }

    /// Creates a node for this identity bound to an instance.
    pub fn to_node(&self, instance: impl Into<String>) -> Node {
        Node::new(self.clone(), instance)
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.domain.eq_ignore_ascii_case(&other.domain)
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.to_ascii_lowercase().hash(state);
        self.domain.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.domain.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}@{}", self.name, self.domain)
        }
    }
}

impl FromStr for Identity {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// An identity bound to a specific connection instance.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// The account identity.
    pub identity: Identity,
    /// Connection instance, empty when unknown.
    pub instance: String,
}

impl Node {
    /// Creates a new node.
    pub fn new(identity: Identity, instance: impl Into<String>) -> Self {
        Self {
            identity,
            instance: instance.into(),
        }
    }

    /// Parses a node from its `name@domain/instance` form.
    pub fn parse(s: &str) -> Result<Self, EnvelopeError> {
        let s = s.trim();
        let (identity, instance) = match s.split_once('/') {
            Some((identity, instance)) => (identity, instance),
            None => (s, ""),
        };

        let identity =
            Identity::parse(identity).map_err(|_| EnvelopeError::InvalidNode(s.to_string()))?;
        Ok(Self::new(identity, instance))
    }

    /// Returns the account name.
    pub fn name(&self) -> &str {
        &self.identity.name
    }

    /// Returns the domain.
    pub fn domain(&self) -> &str {
        &self.identity.domain
    }

    /// True when name, domain and instance are all present.
    pub fn is_complete(&self) -> bool {
        !self.identity.name.is_empty()
            && !self.identity.domain.is_empty()
            && !self.instance.is_empty()
    }

    /// Returns a copy of this node with the given instance.
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity && self.instance.eq_ignore_ascii_case(&other.instance)
    }
}

impl Eq for Node {}

impl Hash for Node {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
        self.instance.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.instance.is_empty() {
            write!(f, "{}", self.identity)
        } else {
            write!(f, "{}/{}", self.identity, self.instance)
        }
    }
}

impl FromStr for Node {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Identity> for Node {
    fn from(identity: Identity) -> Self {
        Self::new(identity, "")
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
