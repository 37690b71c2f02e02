//! # Exchange Runtime
//!
//! Transport contract for transactional request/reply messaging over queue
//! managers, with an in-memory broker for tests and demos.
//!
//! This library provides:
//! - Validated destination names, message ids and correlation ids
//! - Outbound and received message envelopes
//! - Destination kinds and transaction modes
//! - Endpoint descriptions with redacted credentials
//! - `Connector` / `Connection` / `Destination` traits
//! - An in-memory broker with units of work and redelivery counting
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all transport operations
//! - [`message`] - Message structures and identifiers
//! - [`destination`] - Destination kinds and transaction modes
//! - [`endpoint`] - Broker endpoints, credentials and TLS settings
//! - [`transport`] - Transport traits
//! - [`provider`] - Provider configuration
//! - [`providers`] - Provider implementations

pub mod destination;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;
pub mod transport;

// Re-export commonly used types at crate root for convenience
pub use destination::{DestinationKind, TransactionMode};
pub use endpoint::{Credentials, Endpoint, TlsSettings};
pub use error::{ConfigurationError, SerializationError, TransportError, ValidationError};
pub use message::{
    CorrelationId, DestinationName, Message, MessageFormat, MessageId, ReceivedMessage, Timestamp,
};
pub use provider::{EndpointStatus, InMemoryConfig};
pub use providers::InMemoryBroker;
pub use transport::{Connection, Connector, Destination, Operation};
