//! # Responder Loop
//!
//! Consumes requests under a unit of work, computes replies with a
//! [`RequestProcessor`], sends each reply to the request's reply-to destination
//! and resolves the unit of work exactly once per cycle:
//!
//! - success: commit (consumes the request, publishes the reply)
//! - failure below the redelivery threshold: rollback (broker redelivers)
//! - failure at or above the threshold: divert to the backout queue, then commit
//!
//! Cycles run strictly one after another. A shutdown signal is honoured at the
//! top of each cycle, never in the middle of one.

use crate::config::{DestinationsConfig, ResponderConfig};
use crate::processor::{ProcessingError, RequestProcessor};
use crate::quarantine::{QuarantineDecision, QuarantinePolicy};
use exchange_runtime::{
    Connection, Destination, DestinationKind, DestinationName, Message, MessageId,
    ReceivedMessage, TransactionMode, TransportError,
};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Property naming why a message was diverted
pub const BACKOUT_REASON_PROPERTY: &str = "backout_reason";

/// Property recording the redelivery count at diversion time
pub const BACKOUT_REDELIVERY_COUNT_PROPERTY: &str = "backout_redelivery_count";

// ============================================================================
// Errors
// ============================================================================

/// How a unit of work is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Commit,
    Rollback,
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Commit => write!(f, "commit"),
            Self::Rollback => write!(f, "rollback"),
        }
    }
}

/// Errors that stop a responder
#[derive(Debug, Error)]
pub enum ResponderError {
    #[error("Failed to open source destination {destination}: {source}")]
    Open {
        destination: String,
        #[source]
        source: TransportError,
    },

    /// The unit of work could not be resolved, so its state is unknown
    #[error("Failed to {operation} unit of work: {source}")]
    Resolution {
        operation: Resolution,
        #[source]
        source: TransportError,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Why a cycle counted as a failure
#[derive(Debug, Error)]
pub enum CycleFailure {
    #[error("receive failed: {0}")]
    Receive(TransportError),

    #[error("request has no reply-to destination")]
    MissingReplyTo,

    #[error("processing failed: {0}")]
    Processing(#[from] ProcessingError),

    #[error("could not open reply destination {destination}: {source}")]
    OpenReply {
        destination: String,
        source: TransportError,
    },

    #[error("could not send reply to {destination}: {source}")]
    SendReply {
        destination: String,
        source: TransportError,
    },
}

// ============================================================================
// Outcomes and statistics
// ============================================================================

/// Result of one responder cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// No message arrived within the receive wait
    Idle,
    /// Reply sent and unit of work committed
    Replied {
        request_id: MessageId,
        reply_id: MessageId,
    },
    /// Unit of work rolled back; `message_id` is absent when the receive itself failed
    RolledBack {
        message_id: Option<MessageId>,
        redelivery_count: u32,
    },
    /// Message diverted and unit of work committed; `archived` is false when
    /// the backout send failed
    Diverted { message_id: MessageId, archived: bool },
}

/// Running counters of a responder
#[derive(Debug, Default)]
pub struct ResponderStats {
    received: AtomicU64,
    replied: AtomicU64,
    rolled_back: AtomicU64,
    diverted: AtomicU64,
    diversion_failures: AtomicU64,
    receive_failures: AtomicU64,
    idle_ticks: AtomicU64,
}

/// Point-in-time copy of [`ResponderStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub replied: u64,
    pub rolled_back: u64,
    pub diverted: u64,
    pub diversion_failures: u64,
    pub receive_failures: u64,
    pub idle_ticks: u64,
}

impl ResponderStats {
    fn increment(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            diverted: self.diverted.load(Ordering::Relaxed),
            diversion_failures: self.diversion_failures.load(Ordering::Relaxed),
            receive_failures: self.receive_failures.load(Ordering::Relaxed),
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Settings for a [`Responder`]
#[derive(Debug, Clone)]
pub struct ResponderSettings {
    pub source: DestinationName,
    pub backout: DestinationName,
    pub receive_wait: Duration,
    /// Pause before retrying after a receive failed outright
    pub receive_failure_pause: Duration,
    pub policy: QuarantinePolicy,
    /// Open the source for exclusive input
    pub exclusive: bool,
    /// Stop at the first idle cycle
    pub exit_when_idle: bool,
}

impl ResponderSettings {
    pub fn new(source: DestinationName, backout: DestinationName) -> Self {
        Self {
            source,
            backout,
            receive_wait: Duration::from_secs(3),
            receive_failure_pause: Duration::from_secs(3),
            policy: QuarantinePolicy::default(),
            exclusive: false,
            exit_when_idle: false,
        }
    }

    pub fn from_config(destinations: &DestinationsConfig, responder: &ResponderConfig) -> Self {
        Self {
            source: destinations.queue.clone(),
            backout: destinations.backout_queue.clone(),
            receive_wait: responder.receive_wait(),
            receive_failure_pause: responder.receive_failure_pause(),
            policy: QuarantinePolicy::new(responder.redelivery_threshold),
            exclusive: responder.exclusive,
            exit_when_idle: responder.exit_when_idle,
        }
    }

    pub fn with_receive_wait(mut self, wait: Duration) -> Self {
        self.receive_wait = wait;
        self
    }

    pub fn with_receive_failure_pause(mut self, pause: Duration) -> Self {
        self.receive_failure_pause = pause;
        self
    }

    pub fn with_policy(mut self, policy: QuarantinePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_exit_when_idle(mut self, exit_when_idle: bool) -> Self {
        self.exit_when_idle = exit_when_idle;
        self
    }
}

// ============================================================================
// Responder
// ============================================================================

/// Transactional consume, process, reply loop over one connection
pub struct Responder {
    connection: Box<dyn Connection>,
    source: Box<dyn Destination>,
    processor: Arc<dyn RequestProcessor>,
    settings: ResponderSettings,
    stats: Arc<ResponderStats>,
}

impl Responder {
    /// Open the source destination on `connection`.
    ///
    /// The responder owns the connection, and with it the unit of work.
    pub async fn open(
        connection: Box<dyn Connection>,
        processor: Arc<dyn RequestProcessor>,
        settings: ResponderSettings,
    ) -> Result<Self, ResponderError> {
        let kind = if settings.exclusive {
            DestinationKind::ReceiveExclusive(settings.source.clone())
        } else {
            DestinationKind::ReceiveShared(settings.source.clone())
        };

        let source = connection
            .open(kind)
            .await
            .map_err(|source| ResponderError::Open {
                destination: settings.source.to_string(),
                source,
            })?;

        info!(
            destination = %settings.source,
            backout = %settings.backout,
            endpoint = %connection.endpoint().connection_name(),
            processor = processor.name(),
            threshold = settings.policy.threshold(),
            "Responder ready"
        );

        Ok(Self {
            connection,
            source,
            processor,
            settings,
            stats: Arc::new(ResponderStats::default()),
        })
    }

    /// Shared handle to the running counters
    pub fn stats(&self) -> Arc<ResponderStats> {
        Arc::clone(&self.stats)
    }

    /// Run one receive, process, reply, resolve cycle
    pub async fn run_cycle(&self) -> Result<CycleOutcome, ResponderError> {
        let received = match self
            .source
            .receive(self.settings.receive_wait, TransactionMode::Transacted)
            .await
        {
            Ok(Some(message)) => message,
            Ok(None) => {
                ResponderStats::increment(&self.stats.idle_ticks);
                debug!(destination = %self.settings.source, "No message available");
                return Ok(CycleOutcome::Idle);
            }
            Err(error) => {
                ResponderStats::increment(&self.stats.receive_failures);
                return self.resolve_failure(None, CycleFailure::Receive(error)).await;
            }
        };

        ResponderStats::increment(&self.stats.received);
        debug!(
            message_id = %received.message_id,
            redelivery_count = received.redelivery_count,
            destination = %self.settings.source,
            "Request received"
        );

        match self.reply(&received).await {
            Ok(reply_id) => {
                self.resolve(Resolution::Commit).await?;
                ResponderStats::increment(&self.stats.replied);
                info!(
                    message_id = %received.message_id,
                    correlation_id = %received.reply_correlation(),
                    reply_id = %reply_id,
                    "Reply sent and committed"
                );
                Ok(CycleOutcome::Replied {
                    request_id: received.message_id,
                    reply_id,
                })
            }
            Err(failure) => self.resolve_failure(Some(received), failure).await,
        }
    }

    /// Run cycles until shutdown is signalled, a fatal error occurs, or (with
    /// `exit_when_idle`) the source runs dry.
    pub async fn run(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<StatsSnapshot, ResponderError> {
        info!(destination = %self.settings.source, "Responder loop started");

        loop {
            if *shutdown.borrow() {
                info!(destination = %self.settings.source, "Shutdown requested");
                break;
            }

            match self.run_cycle().await {
                Ok(CycleOutcome::Idle) if self.settings.exit_when_idle => {
                    info!(destination = %self.settings.source, "Source drained; stopping");
                    break;
                }
                Ok(CycleOutcome::RolledBack {
                    message_id: None, ..
                }) => {
                    // Receive failed immediately
                    let pause = self.settings.receive_failure_pause;
                    if pause.is_zero() {
                        tokio::task::yield_now().await;
                    } else {
                        tokio::select! {
                            _ = tokio::time::sleep(pause) => {}
                            _ = shutdown.changed() => {}
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(destination = %self.settings.source, error = %e, "Responder stopped");
                    return Err(e);
                }
            }
        }

        let snapshot = self.stats.snapshot();
        info!(
            replied = snapshot.replied,
            rolled_back = snapshot.rolled_back,
            diverted = snapshot.diverted,
            "Responder loop finished"
        );
        Ok(snapshot)
    }

    /// Close the source and disconnect
    pub async fn close(self) -> Result<(), ResponderError> {
        self.source.close().await?;
        self.connection.disconnect().await?;
        Ok(())
    }

    async fn reply(&self, request: &ReceivedMessage) -> Result<MessageId, CycleFailure> {
        let reply_to = request
            .reply_to
            .clone()
            .ok_or(CycleFailure::MissingReplyTo)?;

        let processed = self.processor.process(request)?;

        let mut reply = Message::new(processed.body)
            .with_correlation_id(request.reply_correlation())
            .with_format(processed.format);
        reply.properties = processed.properties;

        let destination = self
            .connection
            .open(DestinationKind::Send(reply_to.clone()))
            .await
            .map_err(|source| CycleFailure::OpenReply {
                destination: reply_to.to_string(),
                source,
            })?;

        let sent = destination
            .send(reply, TransactionMode::Transacted)
            .await
            .map_err(|source| CycleFailure::SendReply {
                destination: reply_to.to_string(),
                source,
            });
        close_quietly(destination.as_ref()).await;

        sent
    }

    async fn resolve_failure(
        &self,
        message: Option<ReceivedMessage>,
        failure: CycleFailure,
    ) -> Result<CycleOutcome, ResponderError> {
        // Nothing was taken off the queue when the receive failed, so there is
        // nothing to divert.
        let decision = match &message {
            Some(message) => self.settings.policy.decide(message.redelivery_count),
            None => QuarantineDecision::Rollback,
        };

        match (decision, message) {
            (QuarantineDecision::DivertAndCommit, Some(message)) => {
                let archived = self.divert(&message, &failure).await;
                self.resolve(Resolution::Commit).await?;

                ResponderStats::increment(&self.stats.diverted);
                if archived {
                    warn!(
                        message_id = %message.message_id,
                        redelivery_count = message.redelivery_count,
                        destination = %self.settings.backout,
                        reason = %failure,
                        "Message diverted to backout queue"
                    );
                } else {
                    ResponderStats::increment(&self.stats.diversion_failures);
                }

                Ok(CycleOutcome::Diverted {
                    message_id: message.message_id,
                    archived,
                })
            }
            (_, message) => {
                self.resolve(Resolution::Rollback).await?;
                ResponderStats::increment(&self.stats.rolled_back);

                let redelivery_count = message.as_ref().map_or(0, |m| m.redelivery_count);
                warn!(
                    message_id = ?message.as_ref().map(|m| m.message_id.as_str()),
                    redelivery_count,
                    attempts_remaining = self.settings.policy.attempts_remaining(redelivery_count),
                    reason = %failure,
                    "Unit of work rolled back"
                );

                Ok(CycleOutcome::RolledBack {
                    message_id: message.map(|m| m.message_id),
                    redelivery_count,
                })
            }
        }
    }

    /// Send the failed message to the backout queue inside the current unit of work.
    ///
    /// Returns whether the message was archived. Failures are logged, not retried.
    async fn divert(&self, message: &ReceivedMessage, failure: &CycleFailure) -> bool {
        let diverted = message
            .message()
            .with_property(BACKOUT_REASON_PROPERTY.to_string(), failure.to_string())
            .with_property(
                BACKOUT_REDELIVERY_COUNT_PROPERTY.to_string(),
                message.redelivery_count.to_string(),
            );

        let result = match self
            .connection
            .open(DestinationKind::Send(self.settings.backout.clone()))
            .await
        {
            Ok(backout) => {
                let sent = backout.send(diverted, TransactionMode::Transacted).await;
                close_quietly(backout.as_ref()).await;
                sent
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(_) => true,
            Err(e) => {
                error!(
                    message_id = %message.message_id,
                    redelivery_count = message.redelivery_count,
                    destination = %self.settings.backout,
                    error = %e,
                    "Could not divert message; committing without archive"
                );
                false
            }
        }
    }

    async fn resolve(&self, operation: Resolution) -> Result<(), ResponderError> {
        let result = match operation {
            Resolution::Commit => self.connection.commit().await,
            Resolution::Rollback => self.connection.rollback().await,
        };

        result.map_err(|source| {
            error!(operation = %operation, error = %source, "Unit of work could not be resolved");
            ResponderError::Resolution { operation, source }
        })
    }
}

async fn close_quietly(destination: &dyn Destination) {
    if let Err(e) = destination.close().await {
        debug!(destination = %destination.name(), error = %e, "Close failed");
    }
}

#[cfg(test)]
#[path = "responder_tests.rs"]
mod tests;
