//! # Exchange Core
//!
//! Transactional request/reply exchange over queue managers.
//!
//! This crate pairs requests with replies, runs the consume-process-reply
//! responder loop under a unit of work, quarantines poison messages, and picks
//! broker endpoints from an ordered list. It depends only on the transport
//! traits of `exchange-runtime`; any connector can be plugged in.
//!
//! ## Module Organization
//!
//! - [`correlation`] - Registry pairing replies with waiting requests
//! - [`requester`] - Sends requests and awaits correlated replies
//! - [`responder`] - Transactional responder loop
//! - [`processor`] - Business logic applied to each request
//! - [`quarantine`] - Redelivery threshold policy
//! - [`failover`] - Multi-endpoint connection selection
//! - [`config`] - Layered configuration loading
//!
//! ## Usage
//!
//! ```rust
//! use exchange_core::{QuarantineDecision, QuarantinePolicy};
//!
//! let policy = QuarantinePolicy::new(5);
//! assert_eq!(policy.decide(4), QuarantineDecision::Rollback);
//! assert_eq!(policy.decide(5), QuarantineDecision::DivertAndCommit);
//! ```

pub mod config;
pub mod correlation;
pub mod failover;
pub mod processor;
pub mod quarantine;
pub mod requester;
pub mod responder;

pub use config::{
    ConfigError, ConfigFormat, ConfigLoader, DestinationsConfig, ExchangeConfig, LoggingConfig,
    RequesterConfig, ResponderConfig,
};
pub use correlation::{CorrelationError, CorrelationRegistry, Offer};
pub use failover::{connect_all_available, connect_first_available, ConnectError};
pub use processor::{
    EchoProcessor, FactorsReply, PrimeFactorsProcessor, ProcessedReply, ProcessingError,
    RequestProcessor, SquareReply, SquareValueProcessor, ValueRequest,
};
pub use quarantine::{QuarantineDecision, QuarantinePolicy, DEFAULT_REDELIVERY_THRESHOLD};
pub use requester::{CorrelationScheme, Reply, RequestError, Requester, RequesterSettings};
pub use responder::{
    CycleFailure, CycleOutcome, Resolution, Responder, ResponderError, ResponderSettings,
    ResponderStats, StatsSnapshot,
};
