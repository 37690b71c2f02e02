//! Error types for transport operations.

use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for all transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Endpoint unavailable: {endpoint}")]
    EndpointUnavailable { endpoint: String },

    #[error("Connection to {endpoint} failed: {message}")]
    ConnectionFailed { endpoint: String, message: String },

    #[error("Authentication failed for {endpoint}: {message}")]
    AuthenticationFailed { endpoint: String, message: String },

    #[error("Destination not found: {name}")]
    DestinationNotFound { name: String },

    #[error("Operation '{operation}' is not permitted on destination {name}")]
    InvalidOperation { name: String, operation: String },

    #[error("Send to {destination} failed: {message}")]
    SendFailed {
        destination: String,
        message: String,
    },

    #[error("Receive from {destination} failed: {message}")]
    ReceiveFailed {
        destination: String,
        message: String,
    },

    #[error("Commit failed: {message}")]
    CommitFailed { message: String },

    #[error("Rollback failed: {message}")]
    RollbackFailed { message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl TransportError {
    /// Check whether the endpoint reported itself unavailable at connect time.
    ///
    /// Endpoint selection skips these endpoints; every other connect error is fatal.
    pub fn is_endpoint_unavailable(&self) -> bool {
        matches!(self, Self::EndpointUnavailable { .. })
    }

    /// Check if error is transient and the operation could succeed later
    pub fn is_transient(&self) -> bool {
        match self {
            Self::EndpointUnavailable { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::AuthenticationFailed { .. } => false,
            Self::DestinationNotFound { .. } => false,
            Self::InvalidOperation { .. } => false,
            Self::SendFailed { .. } => true,
            Self::ReceiveFailed { .. } => true,
            Self::CommitFailed { .. } => true,
            Self::RollbackFailed { .. } => true,
            Self::ConnectionClosed => false,
            Self::Timeout { .. } => true,
            Self::MessageTooLarge { .. } => false,
            Self::Serialization(_) => false,
            Self::Configuration(_) => false,
            Self::Validation(_) => false,
        }
    }
}

/// Errors during message serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Message body is not valid UTF-8")]
    InvalidUtf8,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
