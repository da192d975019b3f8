//! Tracing setup for Lime hosts.
//!
//! Library crates only emit `tracing` events; the process hosting a
//! listener or a client installs the subscriber once at startup:
//!
//! ```ignore
//! use lime_core::tracing::{init_tracing, TracingConfig};
//!
//! init_tracing(TracingConfig::server()).expect("failed to initialize tracing");
//! ```
//!
//! The filter is taken from `LIME_LOG`, then `RUST_LOG`, then
//! [`TracingConfig::default_directive`].

use thiserror::Error;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

/// Crates whose events are enabled by the default filter.
pub const LIME_TARGETS: &[&str] = &[
    "lime_core",
    "lime_protocol",
    "lime_channel",
    "lime_server",
    "lime_client",
];

/// Environment variables consulted for a filter, in order.
pub const FILTER_ENV_VARS: &[&str] = &["LIME_LOG", "RUST_LOG"];

#[derive(Debug, Error)]
pub enum TracingError {
    #[error("a global tracing subscriber is already installed: {0}")]
    AlreadyInstalled(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("invalid filter directive {directive:?}: {source}")]
    InvalidFilter {
        directive: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },
}

/// How events are rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TracingOutputFormat {
    /// Multi-line, for a developer terminal.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// One JSON object per event, for log collectors.
    Json,
}

/// Subscriber settings.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for Lime crates when no filter is configured.
    pub level: Level,
    pub format: TracingOutputFormat,
    /// Source file and line on each event.
    pub source_location: bool,
    pub timestamps: bool,
    /// Emit span open/close events, e.g. around a session negotiation.
    pub span_events: bool,
    /// Explicit filter; takes precedence over the environment.
    pub filter: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: TracingOutputFormat::Pretty,
            source_location: false,
            timestamps: true,
            span_events: false,
            filter: None,
        }
    }
}

impl TracingConfig {
    /// Compact debug output without timestamps, for client tools.
    #[must_use]
    pub fn client_debug() -> Self {
        Self {
            level: Level::DEBUG,
            format: TracingOutputFormat::Compact,
            source_location: true,
            timestamps: false,
            ..Self::default()
        }
    }

    /// JSON output with span events, for servers hosting many channels.
    #[must_use]
    pub fn server() -> Self {
        Self {
            format: TracingOutputFormat::Json,
            source_location: true,
            span_events: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingOutputFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Filter enabling every Lime crate at `level`, e.g.
    /// `lime_core=info,lime_protocol=info,...`.
    pub fn default_directive(&self) -> String {
        let level = self.level.as_str().to_ascii_lowercase();
        LIME_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, level))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// The directive in effect: explicit filter, then the first non-empty
    /// variable of [`FILTER_ENV_VARS`], then the default directive.
    pub fn directive(&self) -> String {
        self.directive_with(|name| std::env::var(name).ok())
    }

    fn directive_with(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        if let Some(filter) = &self.filter {
            return filter.clone();
        }
        FILTER_ENV_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .find(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.default_directive())
    }

    fn env_filter(&self, directive: &str) -> Result<EnvFilter, TracingError> {
        EnvFilter::try_new(directive).map_err(|source| TracingError::InvalidFilter {
            directive: directive.to_string(),
            source,
        })
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }

    fn fmt_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let layer = fmt::layer()
            .with_file(self.source_location)
            .with_line_number(self.source_location)
            .with_span_events(self.span_events());

        match (self.format, self.timestamps) {
            (TracingOutputFormat::Pretty, true) => layer.pretty().boxed(),
            (TracingOutputFormat::Pretty, false) => layer.pretty().without_time().boxed(),
            (TracingOutputFormat::Compact, true) => layer.compact().boxed(),
            (TracingOutputFormat::Compact, false) => layer.compact().without_time().boxed(),
            (TracingOutputFormat::Json, true) => layer.json().boxed(),
            (TracingOutputFormat::Json, false) => layer.json().without_time().boxed(),
        }
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails when a subscriber is already installed or the filter directive
/// does not parse.
pub fn init_tracing(config: TracingConfig) -> Result<(), TracingError> {
    let directive = config.directive();
    let filter = config.env_filter(&directive)?;
    let subscriber = tracing_subscriber::registry()
        .with(config.fmt_layer())
        .with(filter);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing::debug!(directive = %directive, format = ?config.format, "Tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets() {
        let server = TracingConfig::server();
        assert_eq!(server.format, TracingOutputFormat::Json);
        assert_eq!(server.level, Level::INFO);
        assert!(server.span_events);

        let client = TracingConfig::client_debug();
        assert_eq!(client.level, Level::DEBUG);
        assert!(!client.timestamps);
    }

    #[test]
    fn default_directive_covers_all_crates() {
        let directive = TracingConfig::client_debug().default_directive();
        for target in LIME_TARGETS {
            assert!(directive.contains(&format!("{}=debug", target)));
        }
        assert!(EnvFilter::try_new(&directive).is_ok());
    }

    #[test]
    fn directive_precedence() {
        let config = TracingConfig::default().with_level(Level::WARN);
        let env = |name: &str| match name {
            "LIME_LOG" => Some("  ".to_string()),
            "RUST_LOG" => Some("lime_channel=trace".to_string()),
            _ => None,
        };
        assert_eq!(config.directive_with(env), "lime_channel=trace");
        assert_eq!(config.directive_with(|_| None), config.default_directive());

        let config = config.with_filter("lime_server=debug");
        assert_eq!(config.directive_with(env), "lime_server=debug");
    }

    #[test]
    fn invalid_filter_is_reported() {
        let config = TracingConfig::default();
        let error = config.env_filter("lime_core=[").unwrap_err();
        assert!(matches!(
            error,
            TracingError::InvalidFilter { ref directive, .. } if directive == "lime_core=["
        ));
    }
}
