//! # MQ Exchange CLI
//!
//! Command-line interface for the request/reply exchange.
//!
//! This module provides CLI commands for:
//! - Configuration validation and display
//! - An end-to-end demonstration against the in-memory broker

use bytes::Bytes;
use clap::{Parser, Subcommand};
use exchange_core::{
    connect_first_available, ConfigError, ConfigFormat, ConfigLoader, ConnectError,
    EchoProcessor, ExchangeConfig, PrimeFactorsProcessor, RequestError, RequestProcessor,
    Requester, RequesterSettings, Responder, ResponderError, ResponderSettings,
    SquareValueProcessor, StatsSnapshot,
};
use exchange_core::responder::{BACKOUT_REASON_PROPERTY, BACKOUT_REDELIVERY_COUNT_PROPERTY};
use exchange_runtime::endpoint::DEFAULT_PORT;
use exchange_runtime::{Endpoint, EndpointStatus, InMemoryBroker, Message, TransportError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Host of the extra endpoint the demo reports as unavailable
pub const UNAVAILABLE_DEMO_HOST: &str = "mq-unavailable.invalid";

// ============================================================================
// CLI Structure
// ============================================================================

/// MQ Exchange CLI - transactional request/reply over queue managers
#[derive(Parser)]
#[command(name = "mq-exchange")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Transactional request/reply exchange over queue managers")]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MQX_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Logging level; overrides the configured level
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    pub json_logs: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Validate configuration
    Config {
        /// Show resolved configuration
        #[arg(short, long)]
        show: bool,

        /// Output format for configuration
        #[arg(short = 'f', long, default_value = "yaml")]
        format: OutputFormat,
    },

    /// Run a requester and a responder against the in-memory broker
    Demo {
        /// Number of requests to send
        #[arg(short, long, default_value = "5")]
        requests: usize,

        /// Number of unprocessable messages to inject
        #[arg(short, long, default_value = "1")]
        poison: usize,

        /// Put an unavailable endpoint in front of the configured ones
        #[arg(long)]
        unavailable_first: bool,

        /// Business logic the responder applies
        #[arg(long, default_value = "square")]
        processor: ProcessorKind,
    },
}

/// Configuration format options
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// YAML format
    Yaml,
    /// JSON format
    Json,
    /// TOML format
    Toml,
}

impl From<OutputFormat> for ConfigFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Yaml => ConfigFormat::Yaml,
            OutputFormat::Json => ConfigFormat::Json,
            OutputFormat::Toml => ConfigFormat::Toml,
        }
    }
}

/// Request processors available to the demo responder
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum ProcessorKind {
    /// Square the request value
    Square,
    /// Factorize the request value
    PrimeFactors,
    /// Return the request body unchanged
    Echo,
}

impl ProcessorKind {
    pub fn build(self) -> Arc<dyn RequestProcessor> {
        match self {
            Self::Square => Arc::new(SquareValueProcessor),
            Self::PrimeFactors => Arc::new(PrimeFactorsProcessor),
            Self::Echo => Arc::new(EchoProcessor),
        }
    }
}

// ============================================================================
// CLI Error Types
// ============================================================================

/// CLI-specific errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Logging setup failed: {message}")]
    Logging { message: String },

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Responder error: {0}")]
    Responder(#[from] ResponderError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Demo Results
// ============================================================================

/// Options of the `demo` command
#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub requests: usize,
    pub poison: usize,
    pub unavailable_first: bool,
    pub processor: ProcessorKind,
}

/// A reply received during the demo
#[derive(Debug, Clone, Serialize)]
pub struct DemoReply {
    pub request_id: String,
    pub correlation_id: String,
    pub body: String,
}

/// A message found on the backout queue after the demo
#[derive(Debug, Clone, Serialize)]
pub struct QuarantinedMessage {
    pub message_id: String,
    pub redelivery_count: Option<String>,
    pub reason: Option<String>,
    pub body: String,
}

/// Outcome of a demo run
#[derive(Debug, Clone, Serialize)]
pub struct DemoSummary {
    pub endpoint: String,
    pub replies: Vec<DemoReply>,
    pub no_reply: usize,
    pub quarantined: Vec<QuarantinedMessage>,
    pub responder: StatsSnapshot,
}

// ============================================================================
// Main Entry Point
// ============================================================================

/// Main CLI entry point
pub async fn run_cli() -> Result<(), CliError> {
    let cli = Cli::parse();

    let config = load_configuration(cli.config.as_deref())?;
    initialize_logging(
        cli.log_level.as_deref().unwrap_or(&config.logging.level),
        cli.json_logs || config.logging.json_format,
    )?;

    match cli.command {
        Commands::Config { show, format } => {
            println!("{}", execute_config_command(&config, show, format)?);
        }
        Commands::Demo {
            requests,
            poison,
            unavailable_first,
            processor,
        } => {
            let options = DemoOptions {
                requests,
                poison,
                unavailable_first,
                processor,
            };
            let summary = execute_demo_command(&config, &options).await?;
            let rendered = serde_json::to_string_pretty(&summary).map_err(std::io::Error::from)?;
            println!("{}", rendered);
        }
    }

    Ok(())
}

/// Initialize tracing; `RUST_LOG` takes precedence over `level`
fn initialize_logging(level: &str, json: bool) -> Result<(), CliError> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .map_err(|e| CliError::Logging {
            message: format!("invalid log level '{}': {}", level, e),
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };

    result.map_err(|e| CliError::Logging {
        message: e.to_string(),
    })
}

/// Load configuration from the layered sources plus an optional explicit file
pub fn load_configuration(explicit: Option<&Path>) -> Result<ExchangeConfig, ConfigError> {
    let loader = match explicit {
        Some(path) => ConfigLoader::new().with_file(path),
        None => ConfigLoader::new(),
    };
    loader.load()
}

/// Execute config command; returns the text to print
pub fn execute_config_command(
    config: &ExchangeConfig,
    show: bool,
    format: OutputFormat,
) -> Result<String, CliError> {
    config.validate()?;
    info!(endpoints = config.endpoints.len(), "Configuration is valid");

    if show {
        Ok(config.render(format.into())?)
    } else {
        Ok("Configuration is valid".to_string())
    }
}

/// Execute demo command
pub async fn execute_demo_command(
    config: &ExchangeConfig,
    options: &DemoOptions,
) -> Result<DemoSummary, CliError> {
    let broker = InMemoryBroker::default();
    let endpoints = register_demo_endpoints(&broker, config, options.unavailable_first);
    let destinations = &config.destinations;

    let (endpoint, responder_connection) = connect_first_available(&broker, &endpoints).await?;
    let responder = Responder::open(
        responder_connection,
        options.processor.build(),
        ResponderSettings::from_config(destinations, &config.responder).with_exit_when_idle(true),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let responder_task = tokio::spawn(async move {
        let stats = responder.run(shutdown_rx).await;
        let closed = responder.close().await;
        stats.and_then(|stats| closed.map(|_| stats))
    });

    let (_, requester_connection) = connect_first_available(&broker, &endpoints).await?;
    let requester = Requester::open(
        requester_connection.as_ref(),
        RequesterSettings::from_config(destinations, &config.requester),
    )
    .await?;

    for index in 0..options.poison {
        let poison = Message::new(Bytes::from(format!("poison message {}", index)))
            .with_reply_to(requester.reply_to().clone());
        broker.enqueue(&endpoint, &destinations.queue, poison)?;
    }

    let exchanged = exchange_requests(&requester, options.requests).await;

    // On success the responder stops by itself once the request queue is drained,
    // after any poison messages have been quarantined.
    if exchanged.is_err() {
        let _ = shutdown_tx.send(true);
    }
    let stats = match responder_task.await {
        Ok(result) => result?,
        Err(e) => {
            return Err(CliError::Io(std::io::Error::other(format!(
                "responder task failed: {}",
                e
            ))))
        }
    };
    let (replies, no_reply) = exchanged?;

    requester.close().await?;
    requester_connection.disconnect().await?;

    let quarantined = broker
        .drain(&endpoint, &destinations.backout_queue)
        .into_iter()
        .map(|message| QuarantinedMessage {
            message_id: message.message_id.to_string(),
            redelivery_count: message
                .properties
                .get(BACKOUT_REDELIVERY_COUNT_PROPERTY)
                .cloned(),
            reason: message.properties.get(BACKOUT_REASON_PROPERTY).cloned(),
            body: String::from_utf8_lossy(&message.body).into_owned(),
        })
        .collect();

    Ok(DemoSummary {
        endpoint: endpoint.connection_name(),
        replies,
        no_reply,
        quarantined,
        responder: stats,
    })
}

fn register_demo_endpoints(
    broker: &InMemoryBroker,
    config: &ExchangeConfig,
    unavailable_first: bool,
) -> Vec<Endpoint> {
    let mut endpoints = Vec::with_capacity(config.endpoints.len() + 1);

    if unavailable_first {
        let unavailable = Endpoint::new(UNAVAILABLE_DEMO_HOST, DEFAULT_PORT);
        broker.set_endpoint_status(&unavailable, EndpointStatus::Unavailable);
        endpoints.push(unavailable);
    }

    for endpoint in &config.endpoints {
        broker.set_endpoint_status(endpoint, EndpointStatus::Available);
        broker.declare_queue(endpoint, &config.destinations.queue);
        broker.declare_queue(endpoint, &config.destinations.reply_model);
        broker.declare_queue(endpoint, &config.destinations.backout_queue);
        if let Some(topic) = &config.destinations.topic {
            broker.subscribe(endpoint, topic, &config.destinations.queue);
        }
        endpoints.push(endpoint.clone());
    }

    endpoints
}

async fn exchange_requests(
    requester: &Requester,
    count: usize,
) -> Result<(Vec<DemoReply>, usize), RequestError> {
    let mut replies = Vec::with_capacity(count);
    let mut no_reply = 0;

    for index in 0..count {
        let body = serde_json::json!({
            "greeting": "Hello from mq-exchange",
            "value": index as i64 + 2,
        });

        match requester.request(Bytes::from(body.to_string())).await {
            Ok(reply) => replies.push(DemoReply {
                request_id: reply.request_id.to_string(),
                correlation_id: reply.correlation_id.to_string(),
                body: String::from_utf8_lossy(reply.body()).into_owned(),
            }),
            Err(e) if e.is_no_reply() => {
                warn!(error = %e, "Request went unanswered");
                no_reply += 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok((replies, no_reply))
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
