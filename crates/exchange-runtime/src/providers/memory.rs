//! In-memory broker implementation for testing and development.
//!
//! This module provides a fully functional in-memory broker that:
//! - Keeps an isolated set of queues per endpoint (`host(port)`)
//! - Gives every connection its own unit of work with commit and rollback
//! - Counts redeliveries when a rollback returns messages to their queue
//! - Creates and deletes transient dynamic reply queues
//! - Routes topic publications to subscribed queues
//!
//! Test hooks allow marking endpoints unavailable, failing sends to a
//! destination and deleting queues underneath open handles.

use crate::destination::{DestinationKind, TransactionMode};
use crate::endpoint::Endpoint;
use crate::error::TransportError;
use crate::message::{
    CorrelationId, DestinationName, Message, MessageFormat, MessageId, ReceivedMessage, Timestamp,
};
use crate::provider::{EndpointStatus, InMemoryConfig};
use crate::transport::{ensure_operation, Connection, Connector, Destination, Operation};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

/// Prefix used for dynamic reply queues when none is given
pub const DEFAULT_DYNAMIC_PREFIX: &str = "AMQ.*";

const DYNAMIC_SUFFIX_LENGTH: usize = 16;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Shared state for every endpoint served by one broker
struct BrokerState {
    config: InMemoryConfig,
    endpoints: HashMap<String, EndpointStatus>,
    realms: HashMap<String, Realm>,
}

impl BrokerState {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            config,
            endpoints: HashMap::new(),
            realms: HashMap::new(),
        }
    }

    fn realm(&mut self, key: &str) -> &mut Realm {
        self.realms.entry(key.to_string()).or_default()
    }
}

/// Destinations belonging to a single endpoint
#[derive(Default)]
struct Realm {
    queues: HashMap<DestinationName, QueueState>,
    /// Deleted queues are never recreated implicitly
    deleted: HashSet<DestinationName>,
    /// Topic name to subscribed queue names
    subscriptions: HashMap<DestinationName, Vec<DestinationName>>,
    send_failures: HashMap<DestinationName, String>,
}

impl Realm {
    fn create_queue(&mut self, name: &DestinationName) {
        self.deleted.remove(name);
        self.queues.entry(name.clone()).or_insert_with(QueueState::new);
    }

    fn ensure_queue(
        &mut self,
        name: &DestinationName,
        auto_create: bool,
    ) -> Result<(), TransportError> {
        if self.queues.contains_key(name) {
            return Ok(());
        }

        if auto_create && !self.deleted.contains(name) {
            debug!(destination = %name, "Creating queue on first open");
            self.create_queue(name);
            return Ok(());
        }

        Err(TransportError::DestinationNotFound {
            name: name.to_string(),
        })
    }

    fn delete_queue(&mut self, name: &DestinationName) -> bool {
        self.deleted.insert(name.clone());
        for subscribers in self.subscriptions.values_mut() {
            subscribers.retain(|queue| queue != name);
        }

        match self.queues.remove(name) {
            Some(queue) => {
                queue.notify.notify_waiters();
                true
            }
            None => false,
        }
    }

    /// Undo what opening `handle` did to this realm
    fn release(&mut self, handle: &OpenHandle) {
        if handle.transient {
            self.delete_queue(&handle.name);
            debug!(destination = %handle.name, "Deleted dynamic reply queue");
        } else if handle.exclusive {
            if let Some(queue) = self.queues.get_mut(&handle.name) {
                queue.exclusive_reader = false;
            }
        }
    }

    fn check_target(&self, target: &SendTarget, max_depth: usize) -> Result<(), TransportError> {
        match target {
            SendTarget::Queue(name) => {
                let queue = self
                    .queues
                    .get(name)
                    .ok_or_else(|| TransportError::DestinationNotFound {
                        name: name.to_string(),
                    })?;

                if queue.messages.len() >= max_depth {
                    return Err(TransportError::SendFailed {
                        destination: name.to_string(),
                        message: format!("queue full ({} messages)", max_depth),
                    });
                }

                Ok(())
            }
            SendTarget::Topic(_) => Ok(()),
        }
    }

    fn deliver(
        &mut self,
        target: &SendTarget,
        stored: StoredMessage,
        max_depth: usize,
    ) -> Result<(), TransportError> {
        self.check_target(target, max_depth)?;

        match target {
            SendTarget::Queue(name) => {
                if let Some(queue) = self.queues.get_mut(name) {
                    queue.push_back(stored);
                }
            }
            SendTarget::Topic(topic) => {
                let subscribers = self.subscriptions.get(topic).cloned().unwrap_or_default();
                if subscribers.is_empty() {
                    debug!(destination = %topic, "Publication has no subscribers");
                }

                for name in subscribers {
                    match self.queues.get_mut(&name) {
                        Some(queue) if queue.messages.len() < max_depth => {
                            queue.push_back(stored.clone())
                        }
                        Some(_) => {
                            warn!(destination = %name, topic = %topic, "Subscriber queue full; publication dropped")
                        }
                        None => {}
                    }
                }
            }
        }

        Ok(())
    }
}

/// Internal queue state for a single queue
struct QueueState {
    messages: VecDeque<StoredMessage>,
    notify: Arc<Notify>,
    exclusive_reader: bool,
}

impl QueueState {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            notify: Arc::new(Notify::new()),
            exclusive_reader: false,
        }
    }

    fn push_back(&mut self, stored: StoredMessage) {
        self.messages.push_back(stored);
        self.notify.notify_one();
    }

    fn push_front(&mut self, stored: StoredMessage) {
        self.messages.push_front(stored);
        self.notify.notify_one();
    }

    /// Pop the next unexpired message, discarding expired ones
    fn pop_available(&mut self) -> Option<StoredMessage> {
        while let Some(stored) = self.messages.pop_front() {
            if stored.is_expired() {
                debug!(message_id = %stored.message_id, "Discarding expired message");
                continue;
            }
            return Some(stored);
        }
        None
    }
}

/// Where a send lands once it takes effect
#[derive(Debug, Clone)]
enum SendTarget {
    Queue(DestinationName),
    Topic(DestinationName),
}

/// A message stored in a queue with broker metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    correlation_id: Option<CorrelationId>,
    reply_to: Option<DestinationName>,
    format: MessageFormat,
    properties: HashMap<String, String>,
    redelivery_count: u32,
    enqueued_at: Timestamp,
    expires_at: Option<Timestamp>,
}

impl StoredMessage {
    fn from_message(message: Message, message_id: MessageId, default_ttl: Option<Duration>) -> Self {
        let now = Timestamp::now();
        let expires_at = message
            .time_to_live
            .or(default_ttl)
            .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Timestamp::from_datetime(now.as_datetime() + ttl));

        Self {
            message_id,
            body: message.body,
            correlation_id: message.correlation_id,
            reply_to: message.reply_to,
            format: message.format,
            properties: message.properties,
            redelivery_count: 0,
            enqueued_at: now,
            expires_at,
        }
    }

    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(ref expires_at) => Timestamp::now() >= *expires_at,
            None => false,
        }
    }

    fn to_received(&self) -> ReceivedMessage {
        ReceivedMessage {
            message_id: self.message_id.clone(),
            body: self.body.clone(),
            correlation_id: self.correlation_id.clone(),
            reply_to: self.reply_to.clone(),
            format: self.format.clone(),
            properties: self.properties.clone(),
            redelivery_count: self.redelivery_count,
            enqueued_at: self.enqueued_at.clone(),
            delivered_at: Timestamp::now(),
        }
    }
}

/// A destination handle opened on a connection; released once, by whichever
/// of close or disconnect comes first
struct OpenHandle {
    name: DestinationName,
    transient: bool,
    exclusive: bool,
    closed: AtomicBool,
}

type HandleList = Arc<Mutex<Vec<Arc<OpenHandle>>>>;

/// Pending work of one connection
#[derive(Default)]
struct UnitOfWork {
    received: Vec<(DestinationName, StoredMessage)>,
    staged: Vec<(SendTarget, StoredMessage)>,
}

impl UnitOfWork {
    fn is_empty(&self) -> bool {
        self.received.is_empty() && self.staged.is_empty()
    }
}

// ============================================================================
// InMemoryBroker
// ============================================================================

/// In-memory broker serving any number of endpoints.
///
/// Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    /// Create new broker with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::new(config))),
        }
    }

    /// Register an endpoint with its initial status
    pub fn with_endpoint(self, endpoint: &Endpoint, status: EndpointStatus) -> Self {
        self.set_endpoint_status(endpoint, status);
        self
    }

    /// Change how an endpoint answers connection attempts
    pub fn set_endpoint_status(&self, endpoint: &Endpoint, status: EndpointStatus) {
        let mut state = lock(&self.state);
        info!(endpoint = %endpoint.connection_name(), status = ?status, "Endpoint status set");
        state.endpoints.insert(endpoint.connection_name(), status);
    }

    /// Create a queue on an endpoint
    pub fn declare_queue(&self, endpoint: &Endpoint, name: &DestinationName) {
        lock(&self.state)
            .realm(&endpoint.connection_name())
            .create_queue(name);
    }

    /// Delete a queue; open handles on it start failing
    pub fn delete_queue(&self, endpoint: &Endpoint, name: &DestinationName) -> bool {
        lock(&self.state)
            .realm(&endpoint.connection_name())
            .delete_queue(name)
    }

    /// Route publications on `topic` to `queue`, creating the queue if needed
    pub fn subscribe(&self, endpoint: &Endpoint, topic: &DestinationName, queue: &DestinationName) {
        let mut state = lock(&self.state);
        let realm = state.realm(&endpoint.connection_name());
        realm.create_queue(queue);

        let subscribers = realm.subscriptions.entry(topic.clone()).or_default();
        if !subscribers.contains(queue) {
            subscribers.push(queue.clone());
        }
    }

    /// Make every send to `name` fail with `reason`
    pub fn fail_sends_to(&self, endpoint: &Endpoint, name: &DestinationName, reason: &str) {
        lock(&self.state)
            .realm(&endpoint.connection_name())
            .send_failures
            .insert(name.clone(), reason.to_string());
    }

    /// Stop failing sends to `name`
    pub fn clear_send_failure(&self, endpoint: &Endpoint, name: &DestinationName) {
        lock(&self.state)
            .realm(&endpoint.connection_name())
            .send_failures
            .remove(name);
    }

    /// Put a message directly onto a queue, bypassing any unit of work
    pub fn enqueue(
        &self,
        endpoint: &Endpoint,
        name: &DestinationName,
        message: Message,
    ) -> Result<MessageId, TransportError> {
        self.enqueue_redelivered(endpoint, name, message, 0)
    }

    /// Put a message onto a queue as though it had already been redelivered
    pub fn enqueue_redelivered(
        &self,
        endpoint: &Endpoint,
        name: &DestinationName,
        message: Message,
        redelivery_count: u32,
    ) -> Result<MessageId, TransportError> {
        let mut state = lock(&self.state);
        let max_depth = state.config.max_queue_depth;
        let default_ttl = state.config.default_message_ttl;
        let realm = state.realm(&endpoint.connection_name());
        realm.create_queue(name);

        let message_id = MessageId::new();
        let mut stored = StoredMessage::from_message(message, message_id.clone(), default_ttl);
        stored.redelivery_count = redelivery_count;
        realm.deliver(&SendTarget::Queue(name.clone()), stored, max_depth)?;

        Ok(message_id)
    }

    /// Check whether a queue currently exists
    pub fn queue_exists(&self, endpoint: &Endpoint, name: &DestinationName) -> bool {
        lock(&self.state)
            .realms
            .get(&endpoint.connection_name())
            .is_some_and(|realm| realm.queues.contains_key(name))
    }

    /// Number of messages available on a queue
    pub fn queue_depth(&self, endpoint: &Endpoint, name: &DestinationName) -> usize {
        lock(&self.state)
            .realms
            .get(&endpoint.connection_name())
            .and_then(|realm| realm.queues.get(name))
            .map_or(0, |queue| queue.messages.len())
    }

    /// Remove and return every message on a queue
    pub fn drain(&self, endpoint: &Endpoint, name: &DestinationName) -> Vec<ReceivedMessage> {
        let mut state = lock(&self.state);
        match state.realm(&endpoint.connection_name()).queues.get_mut(name) {
            Some(queue) => queue
                .messages
                .drain(..)
                .map(|stored| stored.to_received())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Copy every message on a queue without removing them
    pub fn peek_all(&self, endpoint: &Endpoint, name: &DestinationName) -> Vec<ReceivedMessage> {
        lock(&self.state)
            .realms
            .get(&endpoint.connection_name())
            .and_then(|realm| realm.queues.get(name))
            .map(|queue| queue.messages.iter().map(StoredMessage::to_received).collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl Connector for InMemoryBroker {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn Connection>, TransportError> {
        let key = endpoint.connection_name();
        let status = lock(&self.state)
            .endpoints
            .get(&key)
            .cloned()
            .unwrap_or(EndpointStatus::Unavailable);

        match status {
            EndpointStatus::Available => {
                lock(&self.state).realm(&key);
                info!(endpoint = %key, queue_manager = %endpoint.queue_manager, "Connected");
                Ok(Box::new(InMemoryConnection {
                    state: Arc::clone(&self.state),
                    endpoint: endpoint.clone(),
                    realm: key,
                    work: Arc::new(Mutex::new(UnitOfWork::default())),
                    handles: HandleList::default(),
                    closed: Arc::new(AtomicBool::new(false)),
                }))
            }
            EndpointStatus::Unavailable => Err(TransportError::EndpointUnavailable { endpoint: key }),
            EndpointStatus::Refusing(reason) => Err(TransportError::ConnectionFailed {
                endpoint: key,
                message: reason,
            }),
        }
    }
}

// ============================================================================
// InMemoryConnection
// ============================================================================

/// Connection to one endpoint of an [`InMemoryBroker`]
pub struct InMemoryConnection {
    state: Arc<Mutex<BrokerState>>,
    endpoint: Endpoint,
    realm: String,
    work: Arc<Mutex<UnitOfWork>>,
    handles: HandleList,
    closed: Arc<AtomicBool>,
}

impl InMemoryConnection {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn open_handle(&self, kind: DestinationKind) -> Result<InMemoryDestination, TransportError> {
        let mut state = lock(&self.state);
        let auto_create = state.config.auto_create_queues;
        let realm = state.realm(&self.realm);

        let (name, transient) = match &kind {
            DestinationKind::Send(name) | DestinationKind::ReceiveShared(name) => {
                realm.ensure_queue(name, auto_create)?;
                (name.clone(), false)
            }
            DestinationKind::ReceiveExclusive(name) => {
                realm.ensure_queue(name, auto_create)?;
                if let Some(queue) = realm.queues.get_mut(name) {
                    if queue.exclusive_reader {
                        return Err(TransportError::InvalidOperation {
                            name: name.to_string(),
                            operation: "open for exclusive input while in use".to_string(),
                        });
                    }
                    queue.exclusive_reader = true;
                }
                (name.clone(), false)
            }
            DestinationKind::PublishTopic(topic) => (topic.clone(), false),
            DestinationKind::DynamicReply { model, prefix } => {
                if !auto_create && !realm.queues.contains_key(model) {
                    return Err(TransportError::DestinationNotFound {
                        name: model.to_string(),
                    });
                }

                let name = dynamic_queue_name(prefix)?;
                realm.create_queue(&name);
                debug!(destination = %name, model = %model, "Created dynamic reply queue");
                (name, true)
            }
        };

        let handle = Arc::new(OpenHandle {
            name: name.clone(),
            transient,
            exclusive: matches!(kind, DestinationKind::ReceiveExclusive(_)),
            closed: AtomicBool::new(false),
        });
        lock(&self.handles).push(Arc::clone(&handle));

        Ok(InMemoryDestination {
            state: Arc::clone(&self.state),
            realm: self.realm.clone(),
            name,
            kind,
            handle,
            handles: Arc::clone(&self.handles),
            work: Arc::clone(&self.work),
            connection_closed: Arc::clone(&self.closed),
        })
    }

    fn take_work(&self) -> UnitOfWork {
        std::mem::take(&mut *lock(&self.work))
    }

    fn rollback_pending(&self) {
        let work = self.take_work();
        if work.is_empty() {
            return;
        }

        let discarded = work.staged.len();
        let mut state = lock(&self.state);
        let realm = state.realm(&self.realm);

        for (queue_name, mut stored) in work.received.into_iter().rev() {
            stored.redelivery_count = stored.redelivery_count.saturating_add(1);
            match realm.queues.get_mut(&queue_name) {
                Some(queue) => queue.push_front(stored),
                None => warn!(
                    destination = %queue_name,
                    message_id = %stored.message_id,
                    "Queue deleted before rollback; message dropped"
                ),
            }
        }

        debug!(endpoint = %self.realm, discarded_sends = discarded, "Unit of work rolled back");
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    async fn open(&self, kind: DestinationKind) -> Result<Box<dyn Destination>, TransportError> {
        self.ensure_open()?;
        Ok(Box::new(self.open_handle(kind)?))
    }

    async fn commit(&self) -> Result<(), TransportError> {
        self.ensure_open()?;

        let work = self.take_work();
        let mut state = lock(&self.state);
        let max_depth = state.config.max_queue_depth;
        let realm = state.realm(&self.realm);

        for (target, stored) in work.staged {
            if let Err(e) = realm.deliver(&target, stored, max_depth) {
                warn!(endpoint = %self.realm, error = %e, "Staged send could not be published at commit");
            }
        }

        debug!(endpoint = %self.realm, consumed = work.received.len(), "Unit of work committed");
        Ok(())
    }

    async fn rollback(&self) -> Result<(), TransportError> {
        self.ensure_open()?;
        self.rollback_pending();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.rollback_pending();

        // Disconnecting closes every handle still open on the connection
        let handles = std::mem::take(&mut *lock(&self.handles));
        let mut state = lock(&self.state);
        let realm = state.realm(&self.realm);
        let mut released = 0;
        for handle in handles {
            if !handle.closed.swap(true, Ordering::SeqCst) {
                realm.release(&handle);
                released += 1;
            }
        }

        info!(endpoint = %self.realm, released_handles = released, "Disconnected");
        Ok(())
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

/// Build a dynamic queue name by replacing a trailing `*` with a unique suffix
fn dynamic_queue_name(prefix: &str) -> Result<DestinationName, TransportError> {
    let prefix = if prefix.is_empty() {
        DEFAULT_DYNAMIC_PREFIX
    } else {
        prefix
    };

    let name = match prefix.strip_suffix('*') {
        Some(stem) => {
            let suffix = uuid::Uuid::new_v4().simple().to_string();
            format!("{}{}", stem, &suffix[..DYNAMIC_SUFFIX_LENGTH])
        }
        None => prefix.to_string(),
    };

    Ok(DestinationName::new(name)?)
}

// ============================================================================
// InMemoryDestination
// ============================================================================

/// Outcome of one attempt to take a message from a queue
enum NextMessage {
    Ready(StoredMessage),
    Wait(Arc<Notify>),
}

/// Destination handle opened on an [`InMemoryConnection`]
pub struct InMemoryDestination {
    state: Arc<Mutex<BrokerState>>,
    realm: String,
    name: DestinationName,
    kind: DestinationKind,
    handle: Arc<OpenHandle>,
    handles: HandleList,
    work: Arc<Mutex<UnitOfWork>>,
    connection_closed: Arc<AtomicBool>,
}

impl InMemoryDestination {
    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.handle.closed.load(Ordering::SeqCst)
            || self.connection_closed.load(Ordering::SeqCst)
        {
            Err(TransportError::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    fn next_message(&self) -> Result<NextMessage, TransportError> {
        let mut state = lock(&self.state);
        let queue = state
            .realm(&self.realm)
            .queues
            .get_mut(&self.name)
            .ok_or_else(|| TransportError::DestinationNotFound {
                name: self.name.to_string(),
            })?;

        Ok(match queue.pop_available() {
            Some(stored) => NextMessage::Ready(stored),
            None => NextMessage::Wait(Arc::clone(&queue.notify)),
        })
    }

    fn take(&self, stored: StoredMessage, mode: TransactionMode) -> ReceivedMessage {
        let received = stored.to_received();
        if mode == TransactionMode::Transacted {
            lock(&self.work).received.push((self.name.clone(), stored));
        }
        received
    }
}

#[async_trait]
impl Destination for InMemoryDestination {
    fn name(&self) -> &DestinationName {
        &self.name
    }

    fn kind(&self) -> &DestinationKind {
        &self.kind
    }

    async fn receive(
        &self,
        timeout: Duration,
        mode: TransactionMode,
    ) -> Result<Option<ReceivedMessage>, TransportError> {
        self.ensure_open()?;
        ensure_operation(&self.kind, Operation::Receive)?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notify = match self.next_message()? {
                NextMessage::Ready(stored) => return Ok(Some(self.take(stored, mode))),
                NextMessage::Wait(notify) => notify,
            };

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            if tokio::time::timeout(remaining, notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }

            self.ensure_open()?;
        }
    }

    async fn send(
        &self,
        message: Message,
        mode: TransactionMode,
    ) -> Result<MessageId, TransportError> {
        self.ensure_open()?;
        ensure_operation(&self.kind, Operation::Send)?;

        let target = match &self.kind {
            DestinationKind::PublishTopic(topic) => SendTarget::Topic(topic.clone()),
            _ => SendTarget::Queue(self.name.clone()),
        };

        let message_id = MessageId::new();
        let staged = {
            let mut state = lock(&self.state);
            let max_size = state.config.max_message_size;
            let max_depth = state.config.max_queue_depth;
            let default_ttl = state.config.default_message_ttl;

            if message.body.len() > max_size {
                return Err(TransportError::MessageTooLarge {
                    size: message.body.len(),
                    max_size,
                });
            }

            let realm = state.realm(&self.realm);
            if let Some(reason) = realm.send_failures.get(&self.name) {
                return Err(TransportError::SendFailed {
                    destination: self.name.to_string(),
                    message: reason.clone(),
                });
            }

            let stored = StoredMessage::from_message(message, message_id.clone(), default_ttl);
            match mode {
                TransactionMode::AutoCommit => {
                    realm.deliver(&target, stored, max_depth)?;
                    None
                }
                TransactionMode::Transacted => {
                    realm.check_target(&target, max_depth)?;
                    Some(stored)
                }
            }
        };

        if let Some(stored) = staged {
            lock(&self.work).staged.push((target, stored));
        }

        debug!(destination = %self.name, message_id = %message_id, mode = ?mode, "Message sent");
        Ok(message_id)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.handle.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        lock(&self.handles).retain(|handle| !Arc::ptr_eq(handle, &self.handle));
        lock(&self.state).realm(&self.realm).release(&self.handle);
        Ok(())
    }
}
