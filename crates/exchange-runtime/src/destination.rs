//! Destination kinds and transactional modes used when opening and using destinations.

use crate::message::DestinationName;
use serde::{Deserialize, Serialize};

/// How a destination is opened on a connection.
///
/// One `open` call consumes this; there is no string-keyed dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    /// Queue opened for sending only
    Send(DestinationName),
    /// Queue opened for receiving by a single consumer
    ReceiveExclusive(DestinationName),
    /// Queue or topic subscription opened for receiving alongside other consumers
    ReceiveShared(DestinationName),
    /// Topic opened for publishing
    PublishTopic(DestinationName),
    /// Transient reply queue created from a model queue.
    ///
    /// The broker names it from `prefix`, replacing a trailing `*` with a unique suffix.
    DynamicReply { model: DestinationName, prefix: String },
}

impl DestinationKind {
    /// Name the destination was requested under (the model name for dynamic replies)
    pub fn requested_name(&self) -> &DestinationName {
        match self {
            Self::Send(name)
            | Self::ReceiveExclusive(name)
            | Self::ReceiveShared(name)
            | Self::PublishTopic(name) => name,
            Self::DynamicReply { model, .. } => model,
        }
    }

    /// Check whether handles of this kind accept `send`
    pub fn can_send(&self) -> bool {
        matches!(self, Self::Send(_) | Self::PublishTopic(_))
    }

    /// Check whether handles of this kind accept `receive`
    pub fn can_receive(&self) -> bool {
        matches!(
            self,
            Self::ReceiveExclusive(_) | Self::ReceiveShared(_) | Self::DynamicReply { .. }
        )
    }

    /// Short label used in logs and errors
    pub fn label(&self) -> &'static str {
        match self {
            Self::Send(_) => "send",
            Self::ReceiveExclusive(_) => "receive_exclusive",
            Self::ReceiveShared(_) => "receive_shared",
            Self::PublishTopic(_) => "publish_topic",
            Self::DynamicReply { .. } => "dynamic_reply",
        }
    }
}

impl std::fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DynamicReply { model, prefix } => {
                write!(f, "dynamic_reply({}, {})", model, prefix)
            }
            other => write!(f, "{}({})", other.label(), other.requested_name()),
        }
    }
}

/// Whether a send or receive takes part in the connection's unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Held until the connection commits or rolls back
    Transacted,
    /// Takes effect immediately
    AutoCommit,
}

#[cfg(test)]
#[path = "destination_tests.rs"]
mod tests;
