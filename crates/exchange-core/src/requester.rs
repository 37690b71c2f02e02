//! # Requester
//!
//! Sends correlated requests and waits for the matching reply on a transient
//! reply queue owned by this requester.
//!
//! Two correlation schemes are supported because responders may echo either
//! field: a generated correlation id (with the request's message id registered
//! as an alias), or no correlation id at all, in which case the broker-assigned
//! message id is the key.

use crate::config::{DestinationsConfig, RequesterConfig};
use crate::correlation::{CorrelationError, CorrelationRegistry, Offer};
use bytes::Bytes;
use exchange_runtime::{
    Connection, CorrelationId, Destination, DestinationKind, DestinationName, Message,
    MessageFormat, MessageId, ReceivedMessage, TransactionMode, TransportError,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Errors and results
// ============================================================================

/// Errors returned by [`Requester::request`]
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Failed to send request to {destination}: {source}")]
    SendFailed {
        destination: String,
        #[source]
        source: TransportError,
    },

    #[error("No reply for correlation id {correlation_id} within {timeout:?}")]
    NoReplyReceived {
        correlation_id: CorrelationId,
        timeout: Duration,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Correlation error: {0}")]
    Correlation(#[from] CorrelationError),
}

impl RequestError {
    /// Check whether the request was sent but went unanswered
    pub fn is_no_reply(&self) -> bool {
        matches!(self, Self::NoReplyReceived { .. })
    }
}

/// A reply matched to its request
#[derive(Debug, Clone)]
pub struct Reply {
    pub request_id: MessageId,
    /// Key the reply was awaited under
    pub correlation_id: CorrelationId,
    pub message: ReceivedMessage,
}

impl Reply {
    pub fn body(&self) -> &Bytes {
        &self.message.body
    }
}

/// Which envelope field carries the correlation key of a request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationScheme {
    /// Fresh correlation id per request; replies echoing the message id also match
    #[default]
    Generated,
    /// No correlation id; the broker-assigned message id is the key
    MessageId,
}

// ============================================================================
// Settings
// ============================================================================

/// Settings for a [`Requester`]
#[derive(Debug, Clone)]
pub struct RequesterSettings {
    pub request_queue: DestinationName,
    /// When set, requests are published on this topic instead of put on
    /// `request_queue`
    pub topic: Option<DestinationName>,
    pub reply_model: DestinationName,
    pub reply_prefix: String,
    pub reply_timeout: Duration,
    /// Upper bound on a single receive from the reply queue
    pub reply_poll: Duration,
    pub correlation: CorrelationScheme,
    pub format: MessageFormat,
}

impl RequesterSettings {
    pub fn new(request_queue: DestinationName, reply_model: DestinationName) -> Self {
        Self {
            request_queue,
            topic: None,
            reply_model,
            reply_prefix: "REPLY.*".to_string(),
            reply_timeout: Duration::from_secs(10),
            reply_poll: Duration::from_millis(500),
            correlation: CorrelationScheme::default(),
            format: MessageFormat::Json,
        }
    }

    pub fn from_config(destinations: &DestinationsConfig, requester: &RequesterConfig) -> Self {
        Self {
            request_queue: destinations.queue.clone(),
            topic: destinations.topic.clone(),
            reply_model: destinations.reply_model.clone(),
            reply_prefix: destinations.reply_prefix.clone(),
            reply_timeout: requester.reply_timeout(),
            reply_poll: requester.reply_poll(),
            correlation: requester.correlation,
            format: MessageFormat::Json,
        }
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    pub fn with_correlation(mut self, correlation: CorrelationScheme) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn with_format(mut self, format: MessageFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_topic(mut self, topic: DestinationName) -> Self {
        self.topic = Some(topic);
        self
    }

    /// Destination requests are sent to
    pub fn request_destination(&self) -> &DestinationName {
        self.topic.as_ref().unwrap_or(&self.request_queue)
    }
}

// ============================================================================
// Requester
// ============================================================================

/// Request/reply client bound to one request queue and one dynamic reply queue
pub struct Requester {
    request_destination: Box<dyn Destination>,
    reply_destination: Box<dyn Destination>,
    registry: CorrelationRegistry,
    settings: RequesterSettings,
}

impl Requester {
    /// Open the request queue and create the reply queue on `connection`
    pub async fn open(
        connection: &dyn Connection,
        settings: RequesterSettings,
    ) -> Result<Self, RequestError> {
        let kind = match &settings.topic {
            Some(topic) => DestinationKind::PublishTopic(topic.clone()),
            None => DestinationKind::Send(settings.request_queue.clone()),
        };
        let request_destination = connection.open(kind).await?;
        let reply_destination = connection
            .open(DestinationKind::DynamicReply {
                model: settings.reply_model.clone(),
                prefix: settings.reply_prefix.clone(),
            })
            .await?;

        info!(
            destination = %settings.request_destination(),
            reply_to = %reply_destination.name(),
            endpoint = %connection.endpoint().connection_name(),
            "Requester ready"
        );

        Ok(Self {
            request_destination,
            reply_destination,
            registry: CorrelationRegistry::new(),
            settings,
        })
    }

    /// Name replies are addressed to
    pub fn reply_to(&self) -> &DestinationName {
        self.reply_destination.name()
    }

    /// Send `body` and wait for the matching reply
    pub async fn request(&self, body: Bytes) -> Result<Reply, RequestError> {
        self.request_message(Message::new(body).with_format(self.settings.format.clone()))
            .await
    }

    /// Send a prepared message and wait for the matching reply.
    ///
    /// The reply-to destination and correlation id are set by the requester.
    pub async fn request_message(&self, message: Message) -> Result<Reply, RequestError> {
        let mut message = message.with_reply_to(self.reply_to().clone());
        message.correlation_id = match self.settings.correlation {
            CorrelationScheme::Generated => Some(CorrelationId::generate()),
            CorrelationScheme::MessageId => None,
        };
        let generated = message.correlation_id.clone();

        let request_id = self
            .request_destination
            .send(message, TransactionMode::AutoCommit)
            .await
            .map_err(|source| RequestError::SendFailed {
                destination: self.settings.request_destination().to_string(),
                source,
            })?;

        let key = match generated {
            Some(correlation_id) => {
                self.registry
                    .begin_wait_with_alias(correlation_id.clone(), &request_id)?;
                correlation_id
            }
            None => {
                let correlation_id = CorrelationId::from(&request_id);
                self.registry.begin_wait(correlation_id.clone())?;
                correlation_id
            }
        };

        debug!(
            message_id = %request_id,
            correlation_id = %key,
            destination = %self.settings.request_destination(),
            "Request sent"
        );

        let outcome = tokio::select! {
            reply = self.registry.await_reply(&key, self.settings.reply_timeout) => reply.map_err(RequestError::from),
            error = self.pump_replies() => Err(RequestError::Transport(error)),
        };

        match outcome {
            Ok(message) => {
                info!(
                    message_id = %request_id,
                    correlation_id = %key,
                    "Reply received"
                );
                Ok(Reply {
                    request_id,
                    correlation_id: key,
                    message,
                })
            }
            Err(RequestError::Correlation(CorrelationError::TimedOut { timeout, .. })) => {
                warn!(
                    message_id = %request_id,
                    correlation_id = %key,
                    timeout = ?timeout,
                    "No reply received"
                );
                Err(RequestError::NoReplyReceived {
                    correlation_id: key,
                    timeout,
                })
            }
            Err(error) => {
                self.registry.cancel(&key);
                Err(error)
            }
        }
    }

    /// Feed every message on the reply queue to the registry until a receive fails
    async fn pump_replies(&self) -> TransportError {
        loop {
            match self
                .reply_destination
                .receive(self.settings.reply_poll, TransactionMode::AutoCommit)
                .await
            {
                Ok(Some(message)) => {
                    if let Offer::Unmatched(message) = self.registry.offer(message) {
                        warn!(
                            message_id = %message.message_id,
                            correlation_id = ?message.correlation_id.as_ref().map(|c| c.as_str()),
                            destination = %self.reply_to(),
                            "Discarding unmatched reply"
                        );
                    }
                }
                Ok(None) => continue,
                Err(error) => return error,
            }
        }
    }

    /// Close both destinations; the transient reply queue is deleted
    pub async fn close(self) -> Result<(), RequestError> {
        self.request_destination.close().await?;
        self.reply_destination.close().await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "requester_tests.rs"]
mod tests;
