//! # Correlation Registry
//!
//! Pairs an outbound request with its inbound reply by correlation identifier.
//!
//! A waiter is registered under one key, optionally with an alias so that a
//! responder echoing the request's message id (instead of its correlation id)
//! still reaches the same waiter. Entries are single-use: a match, a timeout or
//! a cancellation removes the entry and its alias, so late replies are reported
//! back to the caller as unmatched.

use exchange_runtime::{CorrelationId, MessageId, ReceivedMessage};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

// ============================================================================
// Errors
// ============================================================================

/// Errors raised by the correlation registry
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    #[error("A wait is already registered for correlation id {correlation_id}")]
    DuplicateCorrelation { correlation_id: CorrelationId },

    #[error("No wait is registered for correlation id {correlation_id}")]
    NotRegistered { correlation_id: CorrelationId },

    #[error("A reply is already being awaited for correlation id {correlation_id}")]
    AlreadyAwaiting { correlation_id: CorrelationId },

    #[error("No reply for correlation id {correlation_id} within {timeout:?}")]
    TimedOut {
        correlation_id: CorrelationId,
        timeout: Duration,
    },
}

// ============================================================================
// Registry
// ============================================================================

/// Result of offering a received message to the registry
#[derive(Debug)]
pub enum Offer {
    /// Handed to the waiter registered for its correlation id
    Matched,
    /// No live waiter; the message is returned to the caller
    Unmatched(ReceivedMessage),
}

impl Offer {
    pub fn is_matched(&self) -> bool {
        matches!(self, Offer::Matched)
    }
}

struct Waiter {
    /// Taken when a reply is matched
    sender: Option<oneshot::Sender<ReceivedMessage>>,
    /// Taken when the caller starts awaiting
    receiver: Option<oneshot::Receiver<ReceivedMessage>>,
    alias: Option<CorrelationId>,
}

#[derive(Default)]
struct RegistryState {
    waiters: HashMap<CorrelationId, Waiter>,
    /// Alias key to the primary key it stands for
    aliases: HashMap<CorrelationId, CorrelationId>,
}

impl RegistryState {
    fn is_known(&self, key: &CorrelationId) -> bool {
        self.waiters.contains_key(key) || self.aliases.contains_key(key)
    }

    fn primary_key(&self, key: &CorrelationId) -> Option<CorrelationId> {
        if self.waiters.contains_key(key) {
            Some(key.clone())
        } else {
            self.aliases.get(key).cloned()
        }
    }

    fn remove(&mut self, primary: &CorrelationId) -> Option<Waiter> {
        let waiter = self.waiters.remove(primary)?;
        if let Some(alias) = &waiter.alias {
            self.aliases.remove(alias);
        }
        Some(waiter)
    }
}

/// Registry of outstanding request/reply waits
#[derive(Default)]
pub struct CorrelationRegistry {
    state: Mutex<RegistryState>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register interest in a reply carrying `correlation_id`
    pub fn begin_wait(&self, correlation_id: CorrelationId) -> Result<(), CorrelationError> {
        self.register(correlation_id, None)
    }

    /// Register interest in a reply carrying either `correlation_id` or the
    /// request's own message id.
    pub fn begin_wait_with_alias(
        &self,
        correlation_id: CorrelationId,
        request_id: &MessageId,
    ) -> Result<(), CorrelationError> {
        let alias = CorrelationId::from(request_id);
        if alias == correlation_id {
            return self.register(correlation_id, None);
        }
        self.register(correlation_id, Some(alias))
    }

    fn register(
        &self,
        correlation_id: CorrelationId,
        alias: Option<CorrelationId>,
    ) -> Result<(), CorrelationError> {
        let mut state = self.state();

        if state.is_known(&correlation_id) {
            return Err(CorrelationError::DuplicateCorrelation { correlation_id });
        }
        if let Some(alias) = &alias {
            if state.is_known(alias) {
                return Err(CorrelationError::DuplicateCorrelation {
                    correlation_id: alias.clone(),
                });
            }
            state.aliases.insert(alias.clone(), correlation_id.clone());
        }

        let (sender, receiver) = oneshot::channel();
        state.waiters.insert(
            correlation_id.clone(),
            Waiter {
                sender: Some(sender),
                receiver: Some(receiver),
                alias,
            },
        );

        debug!(correlation_id = %correlation_id, "Registered reply wait");
        Ok(())
    }

    /// Wait up to `timeout` for the reply registered under `correlation_id`.
    ///
    /// On timeout the entry is removed; a reply arriving later is unmatched.
    pub async fn await_reply(
        &self,
        correlation_id: &CorrelationId,
        timeout: Duration,
    ) -> Result<ReceivedMessage, CorrelationError> {
        let (primary, receiver) = {
            let mut state = self.state();
            let primary = state.primary_key(correlation_id).ok_or_else(|| {
                CorrelationError::NotRegistered {
                    correlation_id: correlation_id.clone(),
                }
            })?;

            let receiver = state
                .waiters
                .get_mut(&primary)
                .and_then(|waiter| waiter.receiver.take())
                .ok_or_else(|| CorrelationError::AlreadyAwaiting {
                    correlation_id: correlation_id.clone(),
                })?;

            (primary, receiver)
        };

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(reply)) => {
                self.state().remove(&primary);
                Ok(reply)
            }
            Ok(Err(_)) => Err(CorrelationError::NotRegistered {
                correlation_id: correlation_id.clone(),
            }),
            Err(_) => {
                self.cancel(correlation_id);
                Err(CorrelationError::TimedOut {
                    correlation_id: correlation_id.clone(),
                    timeout,
                })
            }
        }
    }

    /// Hand a received message to the waiter its correlation id names
    pub fn offer(&self, message: ReceivedMessage) -> Offer {
        let Some(key) = message.correlation_id.clone() else {
            return Offer::Unmatched(message);
        };

        let sender = {
            let mut state = self.state();
            let Some(primary) = state.primary_key(&key) else {
                return Offer::Unmatched(message);
            };

            let (sender, awaiting) = match state.waiters.get_mut(&primary) {
                Some(waiter) => (waiter.sender.take(), waiter.receiver.is_none()),
                None => (None, false),
            };

            // Until the caller starts awaiting, the entry and its alias keep
            // the receiver that now buffers the reply.
            if awaiting {
                state.remove(&primary);
            }
            sender
        };

        match sender {
            Some(sender) => match sender.send(message) {
                Ok(()) => {
                    debug!(correlation_id = %key, "Reply matched");
                    Offer::Matched
                }
                Err(message) => Offer::Unmatched(message),
            },
            None => Offer::Unmatched(message),
        }
    }

    /// Drop the wait registered under `correlation_id` (or its alias)
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        let mut state = self.state();
        match state.primary_key(correlation_id) {
            Some(primary) => state.remove(&primary).is_some(),
            None => false,
        }
    }

    /// Number of waits still expecting a reply
    pub fn pending_count(&self) -> usize {
        self.state()
            .waiters
            .values()
            .filter(|waiter| waiter.sender.is_some())
            .count()
    }
}

#[cfg(test)]
#[path = "correlation_tests.rs"]
mod tests;
