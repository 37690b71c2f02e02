//! Common test utilities for exchange integration tests
//!
//! This module provides:
//! - A broker fixture with the standard destinations declared
//! - A connection wrapper that records every commit and rollback
//! - A processor that fails a set number of times before succeeding

use async_trait::async_trait;
use bytes::Bytes;
use exchange_core::{
    ProcessedReply, ProcessingError, QuarantinePolicy, RequestProcessor, Requester,
    RequesterSettings, Responder, ResponderError, ResponderSettings, SquareValueProcessor,
    StatsSnapshot,
};
use exchange_runtime::{
    Connection, Connector, Destination, DestinationKind, DestinationName, Endpoint,
    EndpointStatus, InMemoryBroker, Message, MessageFormat, ReceivedMessage, TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub fn name(value: &str) -> DestinationName {
    DestinationName::new(value.to_string()).unwrap()
}

pub fn request_queue() -> DestinationName {
    name("DEV.QUEUE.1")
}

pub fn backout_queue() -> DestinationName {
    name("DEV.QUEUE.BACKOUT")
}

pub fn reply_model() -> DestinationName {
    name("DEV.APP.MODEL.QUEUE")
}

/// JSON request body understood by the sample processors
pub fn value_body(value: i64) -> Bytes {
    Bytes::from(serde_json::json!({ "value": value }).to_string())
}

// ============================================================================
// Broker fixture
// ============================================================================

/// In-memory broker with one available endpoint and the standard destinations
#[allow(dead_code)]
pub struct ExchangeFixture {
    pub broker: InMemoryBroker,
    pub endpoint: Endpoint,
}

#[allow(dead_code)]
impl ExchangeFixture {
    pub fn new() -> Self {
        Self::on(Endpoint::default())
    }

    pub fn on(endpoint: Endpoint) -> Self {
        let broker = InMemoryBroker::default().with_endpoint(&endpoint, EndpointStatus::Available);
        declare_standard_queues(&broker, &endpoint);
        Self { broker, endpoint }
    }

    pub fn responder_settings(&self, threshold: u32) -> ResponderSettings {
        ResponderSettings::new(request_queue(), backout_queue())
            .with_receive_wait(Duration::from_millis(200))
            .with_policy(QuarantinePolicy::new(threshold))
    }

    pub async fn responder(
        &self,
        processor: Arc<dyn RequestProcessor>,
        threshold: u32,
    ) -> Responder {
        let connection = self.broker.connect(&self.endpoint).await.unwrap();
        Responder::open(connection, processor, self.responder_settings(threshold))
            .await
            .unwrap()
    }

    /// Responder whose connection records every resolution in `log`
    pub async fn counted_responder(
        &self,
        processor: Arc<dyn RequestProcessor>,
        threshold: u32,
        log: Arc<ResolutionLog>,
    ) -> Responder {
        let inner = self.broker.connect(&self.endpoint).await.unwrap();
        let connection = Box::new(CountingConnection::new(inner, log));
        Responder::open(connection, processor, self.responder_settings(threshold))
            .await
            .unwrap()
    }

    /// Requester on its own connection; the connection is returned to keep it alive
    pub async fn requester(&self, settings: RequesterSettings) -> (Box<dyn Connection>, Requester) {
        let connection = self.broker.connect(&self.endpoint).await.unwrap();
        let requester = Requester::open(connection.as_ref(), settings).await.unwrap();
        (connection, requester)
    }

    pub fn requester_settings(&self) -> RequesterSettings {
        RequesterSettings::new(request_queue(), reply_model())
            .with_reply_timeout(Duration::from_secs(5))
    }

    pub fn enqueue(&self, message: Message) {
        self.broker
            .enqueue(&self.endpoint, &request_queue(), message)
            .unwrap();
    }

    pub fn enqueue_redelivered(&self, message: Message, redelivery_count: u32) {
        self.broker
            .enqueue_redelivered(&self.endpoint, &request_queue(), message, redelivery_count)
            .unwrap();
    }

    pub fn depth(&self, queue: &DestinationName) -> usize {
        self.broker.queue_depth(&self.endpoint, queue)
    }

    pub fn drain(&self, queue: &DestinationName) -> Vec<ReceivedMessage> {
        self.broker.drain(&self.endpoint, queue)
    }
}

pub fn declare_standard_queues(broker: &InMemoryBroker, endpoint: &Endpoint) {
    broker.declare_queue(endpoint, &request_queue());
    broker.declare_queue(endpoint, &backout_queue());
    broker.declare_queue(endpoint, &reply_model());
}

/// Run `responder` on a task until the returned sender signals shutdown
#[allow(dead_code)]
pub fn spawn_responder(
    responder: Responder,
) -> (
    watch::Sender<bool>,
    JoinHandle<Result<StatsSnapshot, ResponderError>>,
) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let stats = responder.run(shutdown_rx).await?;
        responder.close().await?;
        Ok(stats)
    });
    (shutdown_tx, handle)
}

/// Signal shutdown and wait for the responder's final counters
#[allow(dead_code)]
pub async fn stop_responder(
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<Result<StatsSnapshot, ResponderError>>,
) -> StatsSnapshot {
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap().unwrap()
}

/// Request addressed to `reply_to`, as a client would send it
#[allow(dead_code)]
pub fn request_to(reply_to: &DestinationName, value: i64) -> Message {
    Message::new(value_body(value))
        .with_format(MessageFormat::Json)
        .with_reply_to(reply_to.clone())
}

// ============================================================================
// Resolution instrumentation
// ============================================================================

/// One resolution of a unit of work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Commit,
    Rollback,
}

/// Ordered record of the resolutions made on a connection
#[derive(Debug, Default)]
pub struct ResolutionLog {
    entries: Mutex<Vec<Resolution>>,
}

#[allow(dead_code)]
impl ResolutionLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record(&self, resolution: Resolution) {
        self.entries.lock().unwrap().push(resolution);
    }

    pub fn entries(&self) -> Vec<Resolution> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn count(&self, resolution: Resolution) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| **entry == resolution)
            .count()
    }
}

/// Connection that forwards to another connection and logs commits and rollbacks
pub struct CountingConnection {
    inner: Box<dyn Connection>,
    log: Arc<ResolutionLog>,
    fail_commits: bool,
    fail_rollbacks: bool,
}

#[allow(dead_code)]
impl CountingConnection {
    pub fn new(inner: Box<dyn Connection>, log: Arc<ResolutionLog>) -> Self {
        Self {
            inner,
            log,
            fail_commits: false,
            fail_rollbacks: false,
        }
    }

    /// Make every commit fail after it is logged
    pub fn with_failing_commits(mut self) -> Self {
        self.fail_commits = true;
        self
    }

    /// Make every rollback fail after it is logged
    pub fn with_failing_rollbacks(mut self) -> Self {
        self.fail_rollbacks = true;
        self
    }
}

#[async_trait]
impl Connection for CountingConnection {
    async fn open(&self, kind: DestinationKind) -> Result<Box<dyn Destination>, TransportError> {
        self.inner.open(kind).await
    }

    async fn commit(&self) -> Result<(), TransportError> {
        self.log.record(Resolution::Commit);
        if self.fail_commits {
            return Err(TransportError::CommitFailed {
                message: "MQRC_BACKED_OUT".to_string(),
            });
        }
        self.inner.commit().await
    }

    async fn rollback(&self) -> Result<(), TransportError> {
        self.log.record(Resolution::Rollback);
        if self.fail_rollbacks {
            return Err(TransportError::RollbackFailed {
                message: "MQRC_CONNECTION_BROKEN".to_string(),
            });
        }
        self.inner.rollback().await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnect().await
    }

    fn endpoint(&self) -> &Endpoint {
        self.inner.endpoint()
    }
}

// ============================================================================
// Processors
// ============================================================================

/// Fails the first `failures` requests it sees, then squares values
#[allow(dead_code)]
pub struct FlakyProcessor {
    remaining_failures: AtomicUsize,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl FlakyProcessor {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            remaining_failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RequestProcessor for FlakyProcessor {
    fn process(&self, request: &ReceivedMessage) -> Result<ProcessedReply, ProcessingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ProcessingError::Failed {
                message: "transient failure".to_string(),
            });
        }

        SquareValueProcessor.process(request)
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Always fails
#[allow(dead_code)]
pub struct RejectingProcessor;

impl RequestProcessor for RejectingProcessor {
    fn process(&self, _request: &ReceivedMessage) -> Result<ProcessedReply, ProcessingError> {
        Err(ProcessingError::Failed {
            message: "rejected".to_string(),
        })
    }

    fn name(&self) -> &str {
        "rejecting"
    }
}
