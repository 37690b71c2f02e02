//! # Exchange Configuration
//!
//! One explicit configuration value is loaded once and handed to each
//! requester and responder; nothing is kept in process-wide state.
//!
//! Sources, later ones overriding earlier ones:
//!
//! 1. `/etc/mq-exchange/exchange.{yaml,json,toml}` (optional)
//! 2. `config/exchange.{yaml,json,toml}` (optional)
//! 3. An explicit file (required when given)
//! 4. Environment variables prefixed `MQX__`, e.g.
//!    `MQX__RESPONDER__REDELIVERY_THRESHOLD=3`

use crate::quarantine::DEFAULT_REDELIVERY_THRESHOLD;
use crate::requester::CorrelationScheme;
use exchange_runtime::{DestinationName, Endpoint};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "MQX";

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "MQX_CONFIG_FILE";

/// Configuration files searched when no explicit path is given
pub const DEFAULT_SEARCH_PATHS: &[&str] = &["/etc/mq-exchange/exchange", "config/exchange"];

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while loading, validating or rendering configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration value for {field}: {message}")]
    Invalid { field: String, message: String },

    #[error("Failed to render configuration as {format}: {message}")]
    Render { format: ConfigFormat, message: String },
}

impl ConfigError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

// ============================================================================
// Configuration types
// ============================================================================

/// Complete exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Broker endpoints in the order they are tried
    pub endpoints: Vec<Endpoint>,

    pub destinations: DestinationsConfig,

    pub responder: ResponderConfig,

    pub requester: RequesterConfig,

    pub logging: LoggingConfig,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![Endpoint::default()],
            destinations: DestinationsConfig::default(),
            responder: ResponderConfig::default(),
            requester: RequesterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ExchangeConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::invalid(
                "endpoints",
                "at least one endpoint is required",
            ));
        }

        for (index, endpoint) in self.endpoints.iter().enumerate() {
            if endpoint.host.trim().is_empty() {
                return Err(ConfigError::invalid(
                    &format!("endpoints[{}].host", index),
                    "must not be empty",
                ));
            }
            if endpoint.port == 0 {
                return Err(ConfigError::invalid(
                    &format!("endpoints[{}].port", index),
                    "must be non-zero",
                ));
            }
            if endpoint.channel.trim().is_empty() {
                return Err(ConfigError::invalid(
                    &format!("endpoints[{}].channel", index),
                    "must not be empty",
                ));
            }
        }

        if self.destinations.reply_prefix.is_empty() {
            return Err(ConfigError::invalid(
                "destinations.reply_prefix",
                "must not be empty",
            ));
        }
        if self.destinations.queue == self.destinations.backout_queue {
            return Err(ConfigError::invalid(
                "destinations.backout_queue",
                "must differ from the request queue",
            ));
        }

        if self.responder.receive_wait_seconds == 0 {
            return Err(ConfigError::invalid(
                "responder.receive_wait_seconds",
                "must be greater than zero",
            ));
        }
        if self.requester.reply_timeout_seconds == 0 {
            return Err(ConfigError::invalid(
                "requester.reply_timeout_seconds",
                "must be greater than zero",
            ));
        }
        if self.requester.reply_poll_millis == 0 {
            return Err(ConfigError::invalid(
                "requester.reply_poll_millis",
                "must be greater than zero",
            ));
        }

        Ok(())
    }

    /// Render the configuration with every password redacted
    pub fn render(&self, format: ConfigFormat) -> Result<String, ConfigError> {
        let mut redacted = self.clone();
        redacted.endpoints = self.endpoints.iter().map(Endpoint::redacted).collect();

        let rendered = match format {
            ConfigFormat::Yaml => serde_yaml::to_string(&redacted).map_err(|e| e.to_string()),
            ConfigFormat::Json => {
                serde_json::to_string_pretty(&redacted).map_err(|e| e.to_string())
            }
            ConfigFormat::Toml => toml::to_string_pretty(&redacted).map_err(|e| e.to_string()),
        };

        rendered.map_err(|message| ConfigError::Render { format, message })
    }
}

/// Names of the destinations the exchange uses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DestinationsConfig {
    /// Request queue
    pub queue: DestinationName,

    /// Model queue dynamic reply queues are created from
    pub reply_model: DestinationName,

    /// Name prefix for dynamic reply queues; a trailing `*` is completed by the broker
    pub reply_prefix: String,

    /// Where poison messages are diverted
    pub backout_queue: DestinationName,

    /// Topic requests may also be published on
    pub topic: Option<DestinationName>,
}

impl Default for DestinationsConfig {
    fn default() -> Self {
        Self {
            queue: default_name("DEV.QUEUE.1"),
            reply_model: default_name("DEV.APP.MODEL.QUEUE"),
            reply_prefix: "REPLY.*".to_string(),
            backout_queue: default_name("DEV.QUEUE.BACKOUT"),
            topic: None,
        }
    }
}

// Only called with literals that are valid destination names.
fn default_name(value: &'static str) -> DestinationName {
    match DestinationName::new(value.to_string()) {
        Ok(name) => name,
        Err(e) => unreachable!("built-in destination name {value} is invalid: {e}"),
    }
}

/// Responder loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponderConfig {
    /// Longest a single receive waits for a request
    pub receive_wait_seconds: u64,

    /// Pause after a receive that failed outright; zero retries at once
    pub receive_failure_pause_millis: u64,

    /// Redelivery count at which a failing request is diverted
    pub redelivery_threshold: u32,

    /// Stop once the request queue is empty
    pub exit_when_idle: bool,

    /// Open the request queue for exclusive input
    pub exclusive: bool,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            receive_wait_seconds: 3,
            receive_failure_pause_millis: 3000,
            redelivery_threshold: DEFAULT_REDELIVERY_THRESHOLD,
            exit_when_idle: false,
            exclusive: false,
        }
    }
}

impl ResponderConfig {
    pub fn receive_wait(&self) -> Duration {
        Duration::from_secs(self.receive_wait_seconds)
    }

    pub fn receive_failure_pause(&self) -> Duration {
        Duration::from_millis(self.receive_failure_pause_millis)
    }
}

/// Requester settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequesterConfig {
    /// How long a request waits for its reply
    pub reply_timeout_seconds: u64,

    /// Upper bound on one receive from the reply queue
    pub reply_poll_millis: u64,

    pub correlation: CorrelationScheme,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            reply_timeout_seconds: 10,
            reply_poll_millis: 500,
            correlation: CorrelationScheme::Generated,
        }
    }
}

impl RequesterConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_seconds)
    }

    pub fn reply_poll(&self) -> Duration {
        Duration::from_millis(self.reply_poll_millis)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter used when `RUST_LOG` is not set
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

// ============================================================================
// Rendering format
// ============================================================================

/// Output format for rendered configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigFormat {
    #[default]
    Yaml,
    Json,
    Toml,
}

impl std::fmt::Display for ConfigFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Yaml => write!(f, "yaml"),
            Self::Json => write!(f, "json"),
            Self::Toml => write!(f, "toml"),
        }
    }
}

impl FromStr for ConfigFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            other => Err(ConfigError::invalid(
                "format",
                format!("unknown format '{}'; expected yaml, json or toml", other),
            )),
        }
    }
}

// ============================================================================
// Loader
// ============================================================================

/// Layered configuration loader
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
    explicit_file: Option<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            search_paths: DEFAULT_SEARCH_PATHS.iter().map(PathBuf::from).collect(),
            explicit_file: None,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the optional search paths (given without extension)
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    /// Load this file after the search paths; it must exist
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.explicit_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Build, deserialize and validate the configuration
    pub fn load(&self) -> Result<ExchangeConfig, ConfigError> {
        let mut builder = config::Config::builder();

        for path in &self.search_paths {
            debug!(path = %path.display(), "Adding optional configuration source");
            builder = builder.add_source(config::File::from(path.as_path()).required(false));
        }

        if let Some(path) = &self.explicit_file {
            info!(path = %path.display(), "Loading configuration from explicit path");
            builder = builder.add_source(config::File::from(path.as_path()).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(&self.env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let exchange: ExchangeConfig = settings.try_deserialize()?;
        exchange.validate()?;

        info!(
            endpoints = exchange.endpoints.len(),
            queue = %exchange.destinations.queue,
            "Configuration loaded"
        );
        Ok(exchange)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
