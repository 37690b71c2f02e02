//! Transport traits: connecting to an endpoint, opening destinations and
//! resolving the connection's unit of work.
//!
//! Concrete transports implement [`Connector`], [`Connection`] and
//! [`Destination`]; the exchange engine only ever sees these trait objects.

use crate::destination::{DestinationKind, TransactionMode};
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::message::{DestinationName, Message, MessageId, ReceivedMessage};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Establishes connections to broker endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to a single endpoint.
    ///
    /// Fails with [`TransportError::EndpointUnavailable`] when the endpoint reports
    /// itself unreachable; any other error means the endpoint refused the connection.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError>;
}

/// A live connection owning exactly one unit of work at a time
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open a destination on this connection
    async fn open(&self, kind: DestinationKind) -> Result<Box<dyn Destination>, TransportError>;

    /// Make every transacted receive and send since the last resolution permanent
    async fn commit(&self) -> Result<(), TransportError>;

    /// Undo every transacted receive and send since the last resolution
    async fn rollback(&self) -> Result<(), TransportError>;

    /// Close the connection; an unresolved unit of work is rolled back
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Endpoint this connection was established against
    fn endpoint(&self) -> &Endpoint;
}

/// An open queue, topic or subscription handle.
///
/// A handle is used by one loop at a time.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Resolved name of the destination (the generated name for dynamic replies)
    fn name(&self) -> &DestinationName;

    /// Kind the destination was opened with
    fn kind(&self) -> &DestinationKind;

    /// Wait up to `timeout` for the next message.
    ///
    /// `Ok(None)` means no message arrived in time.
    async fn receive(
        &self,
        timeout: Duration,
        mode: TransactionMode,
    ) -> Result<Option<ReceivedMessage>, TransportError>;

    /// Send a message, returning the broker-assigned id
    async fn send(&self, message: Message, mode: TransactionMode)
        -> Result<MessageId, TransportError>;

    /// Close the handle; transient destinations are deleted
    async fn close(&self) -> Result<(), TransportError>;
}

/// Message operation a destination handle may be opened for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Send,
    Receive,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Send => write!(f, "send"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

/// Reject an operation the destination was not opened for
pub fn ensure_operation(kind: &DestinationKind, operation: Operation) -> Result<(), TransportError> {
    let permitted = match operation {
        Operation::Send => kind.can_send(),
        Operation::Receive => kind.can_receive(),
    };

    if permitted {
        Ok(())
    } else {
        Err(TransportError::InvalidOperation {
            name: kind.requested_name().to_string(),
            operation: operation.to_string(),
        })
    }
}

#[cfg(test)]
#[path = "transport_tests.rs"]
mod tests;
