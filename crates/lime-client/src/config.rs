//! Client configuration.
//!
//! Settings live in a TOML file at `<config dir>/lime/client.toml` by
//! default:
//!
//! ```toml
//! uri = "net.tcp://chat.example.org:55321"
//! identity = "alice@example.org"
//! instance = "laptop"
//! password = "secret"
//! encryption = ["none"]
//! pool_size = 2
//!
//! [retry]
//! kind = "exponential"
//! max_retries = 5
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lime_channel::{ChannelConfig, ClientSessionOptions};
use lime_core::{Authentication, Identity, SessionCompression, SessionEncryption};
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::retry::{ExponentialBackoff, FixedRetry, NoRetry, RetryPolicy};

/// Configuration for Lime client channels.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, `net.tcp://host:port`.
    pub uri: String,

    /// Account identity, `name@domain`.
    pub identity: String,

    /// Instance name; the server assigns one when absent.
    pub instance: Option<String>,

    /// Password for the plain scheme.
    pub password: Option<String>,

    /// Key for the key scheme.
    pub key: Option<String>,

    /// Compression preference, best first.
    pub compression: Vec<SessionCompression>,

    /// Encryption preference, best first.
    pub encryption: Vec<SessionEncryption>,

    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,

    /// Session negotiation timeout in seconds.
    pub negotiation_timeout_secs: u64,

    /// Channels kept by a multiplexer.
    pub pool_size: usize,

    /// Retry settings.
    pub retry: RetrySettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            uri: "net.tcp://localhost:55321".to_string(),
            identity: String::new(),
            instance: None,
            password: None,
            key: None,
            compression: vec![SessionCompression::None],
            encryption: vec![SessionEncryption::None],
            connect_timeout_secs: 10,
            negotiation_timeout_secs: 30,
            pool_size: 1,
            retry: RetrySettings::default(),
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("uri", &self.uri)
            .field("identity", &self.identity)
            .field("instance", &self.instance)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .field("compression", &self.compression)
            .field("encryption", &self.encryption)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("negotiation_timeout_secs", &self.negotiation_timeout_secs)
            .field("pool_size", &self.pool_size)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Which retry policy to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryKind {
    None,
    #[default]
    Fixed,
    Exponential,
}

/// Retry settings (`[retry]` section).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub kind: RetryKind,
    pub max_retries: u32,
    /// Delay between fixed retries, and the first exponential delay.
    pub delay_ms: u64,
    /// Cap for exponential delays.
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            kind: RetryKind::Fixed,
            max_retries: 1,
            delay_ms: 0,
            max_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

impl RetrySettings {
    /// Builds the configured policy.
    pub fn policy(&self) -> Arc<dyn RetryPolicy> {
        match self.kind {
            RetryKind::None => Arc::new(NoRetry),
            RetryKind::Fixed => Arc::new(FixedRetry::new(
                self.max_retries,
                Duration::from_millis(self.delay_ms),
            )),
            RetryKind::Exponential => Arc::new(
                ExponentialBackoff::default()
                    .with_initial(Duration::from_millis(self.delay_ms))
                    .with_max(Duration::from_millis(self.max_delay_ms))
                    .with_multiplier(self.multiplier)
                    .with_max_retries(self.max_retries),
            ),
        }
    }
}

impl ClientConfig {
    /// Loads configuration from the default path, or the defaults when the
    /// file does not exist.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parses configuration from TOML text.
    pub fn parse(content: &str) -> ClientResult<Self> {
        toml::from_str(content)
            .map_err(|e| ClientError::Config(format!("failed to parse config: {}", e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("client.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("lime")
    }

    /// Credentials from `password` or `key`; guest when neither is set.
    pub fn authentication(&self) -> ClientResult<Authentication> {
        match (&self.password, &self.key) {
            (Some(_), Some(_)) => Err(ClientError::Config(
                "set either password or key, not both".to_string(),
            )),
            (Some(password), None) => Ok(Authentication::plain(password)),
            (None, Some(key)) => Ok(Authentication::key(key)),
            (None, None) => Ok(Authentication::Guest),
        }
    }

    /// Negotiation options for this client.
    pub fn session_options(&self) -> ClientResult<ClientSessionOptions> {
        if self.identity.is_empty() {
            return Err(ClientError::Config("identity is required".to_string()));
        }
        let identity = Identity::parse(&self.identity)
            .map_err(|e| ClientError::Config(format!("invalid identity: {}", e)))?;

        let mut options = ClientSessionOptions::new(identity, self.authentication()?)
            .with_compression(self.compression.clone())
            .with_encryption(self.encryption.clone());
        if let Some(instance) = &self.instance {
            options = options.with_instance(instance.clone());
        }
        Ok(options)
    }

    /// Channel settings for this client.
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig::default()
            .with_negotiation_timeout(Duration::from_secs(self.negotiation_timeout_secs))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Pool size for a multiplexer; at least one.
    pub fn pool_size(&self) -> usize {
        self.pool_size.max(1)
    }
}
