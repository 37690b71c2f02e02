//! Request processors: the pluggable business logic a responder applies to
//! each request before replying.

use bytes::Bytes;
use exchange_runtime::{MessageFormat, ReceivedMessage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised while computing a reply
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessingError {
    #[error("Invalid request payload: {message}")]
    InvalidPayload { message: String },

    #[error("Unsupported request format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Processing failed: {message}")]
    Failed { message: String },
}

/// Reply payload computed for a request
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedReply {
    pub body: Bytes,
    pub format: MessageFormat,
    pub properties: HashMap<String, String>,
}

impl ProcessedReply {
    pub fn new(body: Bytes, format: MessageFormat) -> Self {
        Self {
            body,
            format,
            properties: HashMap::new(),
        }
    }

    /// Serialize `value` as a JSON reply
    pub fn json<T: Serialize>(value: &T) -> Result<Self, ProcessingError> {
        let body = serde_json::to_vec(value).map_err(|e| ProcessingError::Failed {
            message: format!("could not serialize reply: {}", e),
        })?;
        Ok(Self::new(Bytes::from(body), MessageFormat::Json))
    }

    pub fn with_property(mut self, key: String, value: String) -> Self {
        self.properties.insert(key, value);
        self
    }
}

/// Business logic applied to each request
pub trait RequestProcessor: Send + Sync {
    /// Compute the reply for a request
    fn process(&self, request: &ReceivedMessage) -> Result<ProcessedReply, ProcessingError>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

// ============================================================================
// Sample processors
// ============================================================================

/// Request body understood by the numeric sample processors
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValueRequest {
    #[serde(default)]
    pub greeting: Option<String>,
    pub value: i64,
}

/// Reply body of [`SquareValueProcessor`]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SquareReply {
    pub greeting: String,
    pub value: i64,
}

/// Reply body of [`PrimeFactorsProcessor`]
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FactorsReply {
    pub greeting: String,
    pub value: Vec<u64>,
}

fn parse_value_request(request: &ReceivedMessage) -> Result<ValueRequest, ProcessingError> {
    match &request.format {
        MessageFormat::Json | MessageFormat::Text => {}
        other => {
            return Err(ProcessingError::UnsupportedFormat {
                format: other.to_string(),
            })
        }
    }

    serde_json::from_slice(&request.body).map_err(|e| ProcessingError::InvalidPayload {
        message: e.to_string(),
    })
}

fn greeting(processor: &str) -> String {
    format!(
        "Reply from {} at {}",
        processor,
        chrono::Utc::now().to_rfc3339()
    )
}

/// Replies with the square of the request's `value`
#[derive(Debug, Clone, Copy, Default)]
pub struct SquareValueProcessor;

impl RequestProcessor for SquareValueProcessor {
    fn process(&self, request: &ReceivedMessage) -> Result<ProcessedReply, ProcessingError> {
        let parsed = parse_value_request(request)?;
        let squared = parsed
            .value
            .checked_mul(parsed.value)
            .ok_or_else(|| ProcessingError::Failed {
                message: format!("square of {} overflows", parsed.value),
            })?;

        ProcessedReply::json(&SquareReply {
            greeting: greeting(self.name()),
            value: squared,
        })
    }

    fn name(&self) -> &str {
        "square"
    }
}

/// Largest value [`PrimeFactorsProcessor`] accepts
pub const MAX_FACTORIZABLE_VALUE: u64 = 1_000_000_000_000;

/// Replies with the prime factors of the request's `value`
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimeFactorsProcessor;

impl PrimeFactorsProcessor {
    /// Prime factors of `n` in ascending order, with multiplicity
    pub fn factorize(mut n: u64) -> Vec<u64> {
        let mut factors = Vec::new();
        let mut divisor = 2;

        while divisor <= n / divisor {
            while n % divisor == 0 {
                factors.push(divisor);
                n /= divisor;
            }
            divisor += 1;
        }
        if n > 1 {
            factors.push(n);
        }

        factors
    }
}

impl RequestProcessor for PrimeFactorsProcessor {
    fn process(&self, request: &ReceivedMessage) -> Result<ProcessedReply, ProcessingError> {
        let parsed = parse_value_request(request)?;
        let value = u64::try_from(parsed.value)
            .ok()
            .filter(|v| (2..=MAX_FACTORIZABLE_VALUE).contains(v))
            .ok_or_else(|| ProcessingError::InvalidPayload {
                message: format!("cannot factorize {}", parsed.value),
            })?;

        ProcessedReply::json(&FactorsReply {
            greeting: greeting(self.name()),
            value: Self::factorize(value),
        })
    }

    fn name(&self) -> &str {
        "prime_factors"
    }
}

/// Replies with the request body unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoProcessor;

impl RequestProcessor for EchoProcessor {
    fn process(&self, request: &ReceivedMessage) -> Result<ProcessedReply, ProcessingError> {
        Ok(ProcessedReply::new(
            request.body.clone(),
            request.format.clone(),
        ))
    }

    fn name(&self) -> &str {
        "echo"
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod tests;
