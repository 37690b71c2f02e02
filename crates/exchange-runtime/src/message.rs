//! Message types for transport operations including core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Longest object name a broker accepts for queues and topics.
pub const MAX_DESTINATION_NAME_LENGTH: usize = 48;

/// Longest correlation identifier carried in a message envelope.
pub const MAX_CORRELATION_ID_LENGTH: usize = 128;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated destination (queue or topic) name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DestinationName(String);

impl DestinationName {
    /// Create new destination name with validation
    pub fn new(name: String) -> Result<Self, ValidationError> {
        if name.is_empty() || name.len() > MAX_DESTINATION_NAME_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "destination_name".to_string(),
                message: format!("must be 1-{} characters", MAX_DESTINATION_NAME_LENGTH),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '%' | '-'))
        {
            return Err(ValidationError::InvalidFormat {
                field: "destination_name".to_string(),
                message: "only ASCII alphanumeric, '.', '_', '/', '%' and '-' allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get destination name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DestinationName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DestinationName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for DestinationName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<DestinationName> for String {
    fn from(name: DestinationName) -> Self {
        name.0
    }
}

/// Broker-assigned unique identifier of a sent message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Generate new random message ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Identifier pairing a reply with the request that produced it.
///
/// Absence is modelled as `Option<CorrelationId>` on the envelope; a value of
/// this type is always present and non-blank. Use [`CorrelationId::parse_optional`]
/// to read a wire correlator where an empty or zero-filled value means "none".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create new correlation ID with validation
    pub fn new(id: String) -> Result<Self, ValidationError> {
        if id.is_empty() {
            return Err(ValidationError::Required {
                field: "correlation_id".to_string(),
            });
        }

        if id.len() > MAX_CORRELATION_ID_LENGTH {
            return Err(ValidationError::OutOfRange {
                field: "correlation_id".to_string(),
                message: format!("maximum {} characters", MAX_CORRELATION_ID_LENGTH),
            });
        }

        if !id.chars().all(|c| c.is_ascii_graphic()) {
            return Err(ValidationError::InvalidFormat {
                field: "correlation_id".to_string(),
                message: "only printable ASCII without whitespace allowed".to_string(),
            });
        }

        if Self::is_zero_filled(&id) {
            return Err(ValidationError::InvalidFormat {
                field: "correlation_id".to_string(),
                message: "zero-filled correlators denote an absent correlation id".to_string(),
            });
        }

        Ok(Self(id))
    }

    /// Generate a fresh random correlation ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Read a correlator that may be absent.
    ///
    /// Empty and all-zero values (ignoring `-` separators) map to `None`.
    pub fn parse_optional(value: &str) -> Result<Option<Self>, ValidationError> {
        let trimmed = value.trim();
        if trimmed.is_empty() || Self::is_zero_filled(trimmed) {
            return Ok(None);
        }

        Self::new(trimmed.to_string()).map(Some)
    }

    /// Get correlation ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_zero_filled(value: &str) -> bool {
        value.chars().all(|c| c == '0' || c == '-')
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CorrelationId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for CorrelationId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CorrelationId> for String {
    fn from(id: CorrelationId) -> Self {
        id.0
    }
}

/// Legacy reply pattern: the request's message id becomes the reply's correlator.
impl From<&MessageId> for CorrelationId {
    fn from(id: &MessageId) -> Self {
        Self(id.as_str().to_string())
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Content encoding tag carried with a message body.
///
/// The exchange engine never interprets it; request processors may.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageFormat {
    #[default]
    Text,
    Json,
    Bytes,
    Custom(String),
}

impl std::fmt::Display for MessageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
            Self::Bytes => write!(f, "bytes"),
            Self::Custom(tag) => write!(f, "{}", tag),
        }
    }
}

/// A message to be sent to a destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "bytes_serde")]
    pub body: Bytes,
    pub correlation_id: Option<CorrelationId>,
    pub reply_to: Option<DestinationName>,
    #[serde(default)]
    pub format: MessageFormat,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    pub time_to_live: Option<Duration>,
}

/// Custom serialization for Bytes
mod bytes_serde {
    use base64::{engine::general_purpose, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

impl Message {
    /// Create new message with body
    pub fn new(body: Bytes) -> Self {
        Self {
            body,
            correlation_id: None,
            reply_to: None,
            format: MessageFormat::default(),
            properties: HashMap::new(),
            time_to_live: None,
        }
    }

    /// Create a JSON-formatted message from any serializable value
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(Self::new(Bytes::from(body)).with_format(MessageFormat::Json))
    }

    /// Add correlation ID for request/reply matching
    pub fn with_correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Name the destination a reply should be sent to
    pub fn with_reply_to(mut self, reply_to: DestinationName) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    /// Set content format tag
    pub fn with_format(mut self, format: MessageFormat) -> Self {
        self.format = format;
        self
    }

    /// Add message property
    pub fn with_property(mut self, key: String, value: String) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Add time-to-live for message expiration
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }
}

/// A message received from a destination with delivery metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub body: Bytes,
    pub correlation_id: Option<CorrelationId>,
    pub reply_to: Option<DestinationName>,
    pub format: MessageFormat,
    pub properties: HashMap<String, String>,
    /// Times the broker made this message available again after a rollback
    pub redelivery_count: u32,
    pub enqueued_at: Timestamp,
    pub delivered_at: Timestamp,
}

impl ReceivedMessage {
    /// Convert back to an unmodified Message (for forwarding)
    pub fn message(&self) -> Message {
        Message {
            body: self.body.clone(),
            correlation_id: self.correlation_id.clone(),
            reply_to: self.reply_to.clone(),
            format: self.format.clone(),
            properties: self.properties.clone(),
            time_to_live: None, // TTL is not preserved in received messages
        }
    }

    /// Correlator a reply to this message must carry.
    ///
    /// Echoes the correlation id when present, otherwise the message id.
    pub fn reply_correlation(&self) -> CorrelationId {
        self.correlation_id
            .clone()
            .unwrap_or_else(|| CorrelationId::from(&self.message_id))
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
