//! Transport provider implementations.
//!
//! This module contains concrete implementations of the `Connector`,
//! `Connection` and `Destination` traits.

pub mod memory;

pub use memory::{InMemoryBroker, InMemoryConnection, InMemoryDestination};
