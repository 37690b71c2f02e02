//! Provider types and configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default largest message body a broker accepts (4 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Connect-time state of an endpoint known to the in-memory broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStatus {
    /// Accepts connections
    Available,
    /// Reports itself unreachable; connection selection skips it
    Unavailable,
    /// Rejects connections with the given reason; connection selection aborts
    Refusing(String),
}

/// In-memory provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    /// Create queues on first open instead of requiring a declaration
    pub auto_create_queues: bool,
    /// Maximum messages held by one queue before sends fail
    pub max_queue_depth: usize,
    /// Maximum body size accepted on send
    pub max_message_size: usize,
    /// Time-to-live applied when a message carries none
    pub default_message_ttl: Option<Duration>,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            auto_create_queues: true,
            max_queue_depth: 10_000,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            default_message_ttl: None,
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
