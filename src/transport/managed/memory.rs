// src/transport/managed/memory.rs

//! In-memory managed pub/sub service.
//!
//! Plays the role of a Pub/Sub emulator within one process. Every
//! [`ManagedBus`](crate::ManagedBus) built on the same [`MemoryPubSub`]
//! behaves like a separate process attached to the same service.
//!
//! ## Semantics
//!
//! - Topics and subscriptions must be created up front with
//!   [`MemoryPubSub::create_topic`] and [`MemoryPubSub::create_subscription`].
//! - Publishing to a topic appends a copy of the message to the backlog of
//!   every subscription bound to it.
//! - Open handles of one subscription compete for its backlog; each message
//!   goes to one handle at a time.
//! - `nack` puts the message back at the head of the backlog and wakes every
//!   waiting handle. A message dropped unsettled is treated the same way.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::Notify;
use uuid::Uuid;

use super::service::{
    //
    AckReply,
    ManagedClient,
    ManagedConnector,
    ManagedSubscription,
    ReceivedMessage,
};
use crate::domain::lock_ignore_poison;
use crate::{log_debug, BusError, Result};

struct PendingMessage {
    id: String,
    data: Bytes,
}

struct SubscriptionQueue {
    name: String,
    backlog: Mutex<VecDeque<PendingMessage>>,
    notify: Notify,
    acked: AtomicUsize,
    nacked: AtomicUsize,
}

impl SubscriptionQueue {
    fn push_back(&self, msg: PendingMessage) {
        lock_ignore_poison(&self.backlog).push_back(msg);
        self.notify.notify_waiters();
    }

    fn requeue(&self, msg: PendingMessage) {
        lock_ignore_poison(&self.backlog).push_front(msg);
        self.notify.notify_waiters();
    }

    fn pop(&self) -> Option<PendingMessage> {
        lock_ignore_poison(&self.backlog).pop_front()
    }
}

#[derive(Default)]
struct ServiceState {
    /// topic name -> bound subscription names
    topics: HashMap<String, Vec<String>>,
    subscriptions: HashMap<String, Arc<SubscriptionQueue>>,
}

/// Shared in-memory pub/sub service.
#[derive(Default)]
pub struct MemoryPubSub {
    state: Mutex<ServiceState>,
}

impl MemoryPubSub {
    /// Create a new service with no topics.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connector handing out clients of this service.
    pub fn connector(self: &Arc<Self>) -> Arc<dyn ManagedConnector> {
        Arc::new(MemoryPubSubConnector {
            service: Arc::clone(self),
        })
    }

    /// Create `topic`. Creating an existing topic is a no-op.
    pub fn create_topic(&self, topic: &str) {
        lock_ignore_poison(&self.state)
            .topics
            .entry(topic.to_string())
            .or_default();
    }

    /// Create subscription `name` bound to `topic`.
    ///
    /// # Errors
    ///
    /// Fails if the topic does not exist or the name is already taken.
    pub fn create_subscription(&self, topic: &str, name: &str) -> Result<()> {
        // ---
        let mut state = lock_ignore_poison(&self.state);

        if state.subscriptions.contains_key(name) {
            return Err(BusError::Transport(format!(
                "subscription already exists: {name}"
            )));
        }

        let Some(bound) = state.topics.get_mut(topic) else {
            return Err(BusError::Transport(format!("topic not found: {topic}")));
        };
        bound.push(name.to_string());

        let queue = Arc::new(SubscriptionQueue {
            name: name.to_string(),
            backlog: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            acked: AtomicUsize::new(0),
            nacked: AtomicUsize::new(0),
        });
        state.subscriptions.insert(name.to_string(), queue);
        Ok(())
    }

    /// Messages acknowledged on subscription `name`.
    pub fn acked(&self, name: &str) -> usize {
        self.queue(name)
            .map_or(0, |q| q.acked.load(Ordering::Acquire))
    }

    /// Negative acknowledgements received on subscription `name`.
    pub fn nacked(&self, name: &str) -> usize {
        self.queue(name)
            .map_or(0, |q| q.nacked.load(Ordering::Acquire))
    }

    /// Messages waiting for delivery on subscription `name`.
    pub fn backlog_len(&self, name: &str) -> usize {
        self.queue(name)
            .map_or(0, |q| lock_ignore_poison(&q.backlog).len())
    }

    fn queue(&self, name: &str) -> Option<Arc<SubscriptionQueue>> {
        lock_ignore_poison(&self.state)
            .subscriptions
            .get(name)
            .cloned()
    }

    fn publish(&self, topic: &str, data: Bytes) -> Result<String> {
        // ---
        let state = lock_ignore_poison(&self.state);
        let Some(bound) = state.topics.get(topic) else {
            return Err(BusError::Transport(format!("topic not found: {topic}")));
        };

        let id = Uuid::new_v4().to_string();
        for name in bound {
            if let Some(queue) = state.subscriptions.get(name) {
                queue.push_back(PendingMessage {
                    id: id.clone(),
                    data: data.clone(),
                });
            }
        }
        Ok(id)
    }
}

struct MemoryPubSubConnector {
    service: Arc<MemoryPubSub>,
}

#[async_trait::async_trait]
impl ManagedConnector for MemoryPubSubConnector {
    async fn connect(&self) -> Result<Arc<dyn ManagedClient>> {
        Ok(Arc::new(MemoryPubSubClient {
            service: Arc::clone(&self.service),
            handles: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryPubSubClient {
    service: Arc<MemoryPubSub>,
    handles: Mutex<Vec<Arc<MemorySubscription>>>,
    closed: AtomicBool,
}

#[async_trait::async_trait]
impl ManagedClient for MemoryPubSubClient {
    // ---
    async fn publish(&self, topic: &str, data: Bytes) -> Result<String> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Transport("pubsub client closed".into()));
        }
        self.service.publish(topic, data)
    }

    fn subscription(&self, name: &str) -> Arc<dyn ManagedSubscription> {
        // ---
        let handle = Arc::new(MemorySubscription {
            name: name.to_string(),
            service: Arc::clone(&self.service),
            queue: Mutex::new(None),
            closed: Notify::new(),
        });
        lock_ignore_poison(&self.handles).push(Arc::clone(&handle));
        handle
    }

    async fn close(&self) -> Result<()> {
        // ---
        self.closed.store(true, Ordering::Release);

        let handles: Vec<_> = lock_ignore_poison(&self.handles).drain(..).collect();
        for handle in handles {
            handle.close().await?;
        }
        Ok(())
    }
}

struct MemorySubscription {
    name: String,
    service: Arc<MemoryPubSub>,
    /// Set while open.
    queue: Mutex<Option<Arc<SubscriptionQueue>>>,
    closed: Notify,
}

impl MemorySubscription {
    fn current(&self) -> Option<Arc<SubscriptionQueue>> {
        lock_ignore_poison(&self.queue).clone()
    }
}

#[async_trait::async_trait]
impl ManagedSubscription for MemorySubscription {
    // ---
    fn name(&self) -> &str {
        &self.name
    }

    fn is_open(&self) -> bool {
        lock_ignore_poison(&self.queue).is_some()
    }

    async fn open(&self) -> Result<()> {
        // ---
        let queue = self
            .service
            .queue(&self.name)
            .ok_or_else(|| BusError::Transport(format!("subscription not found: {}", self.name)))?;

        *lock_ignore_poison(&self.queue) = Some(queue);
        log_debug!("pubsub emulator: opened {}", self.name);
        Ok(())
    }

    async fn next(&self) -> Option<Result<ReceivedMessage>> {
        // ---
        loop {
            let queue = self.current()?;

            // Register for wakeups before checking, so none is missed.
            let arrived = queue.notify.notified();
            let closed = self.closed.notified();

            if !self.is_open() {
                return None;
            }

            if let Some(msg) = queue.pop() {
                let id = msg.id.clone();
                let data = msg.data.clone();
                let reply = MemoryAckReply {
                    queue: Arc::clone(&queue),
                    msg: Some(msg),
                };
                return Some(Ok(ReceivedMessage::new(id, data, Box::new(reply))));
            }

            tokio::select! {
                _ = arrived => {}
                _ = closed => {}
            }
        }
    }

    async fn close(&self) -> Result<()> {
        // ---
        lock_ignore_poison(&self.queue).take();
        self.closed.notify_waiters();
        log_debug!("pubsub emulator: closed {}", self.name);
        Ok(())
    }
}

struct MemoryAckReply {
    queue: Arc<SubscriptionQueue>,
    msg: Option<PendingMessage>,
}

#[async_trait::async_trait]
impl AckReply for MemoryAckReply {
    // ---
    async fn ack(self: Box<Self>) -> Result<()> {
        // ---
        let mut this = self;
        if this.msg.take().is_some() {
            this.queue.acked.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    async fn nack(self: Box<Self>) -> Result<()> {
        // ---
        let mut this = self;
        if let Some(msg) = this.msg.take() {
            this.queue.nacked.fetch_add(1, Ordering::AcqRel);
            log_debug!("pubsub emulator: nack {} on {}", msg.id, this.queue.name);
            this.queue.requeue(msg);
        }
        Ok(())
    }
}

impl Drop for MemoryAckReply {
    fn drop(&mut self) {
        // unsettled: behave as if the ack deadline expired
        if let Some(msg) = self.msg.take() {
            self.queue.requeue(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn service() -> Arc<MemoryPubSub> {
        // ---
        let service = MemoryPubSub::new();
        service.create_topic("topic-a");
        service.create_subscription("topic-a", "sub-a").unwrap();
        service
    }

    #[test]
    fn test_provisioning_errors() {
        // ---
        let service = service();

        assert!(service.create_subscription("missing", "sub-b").is_err());
        assert!(service.create_subscription("topic-a", "sub-a").is_err());
        assert!(service.publish("missing", Bytes::from("x")).is_err());
    }

    #[tokio::test]
    async fn test_nack_redelivers_and_ack_settles() {
        // ---
        let service = service();
        let client = service.connector().connect().await.unwrap();
        let handle = client.subscription("sub-a");
        handle.open().await.unwrap();

        client.publish("topic-a", Bytes::from("m1")).await.unwrap();

        let first = handle.next().await.unwrap().unwrap();
        assert_eq!(first.data(), &Bytes::from("m1"));
        first.nack().await.unwrap();
        assert_eq!(service.nacked("sub-a"), 1);
        assert_eq!(service.backlog_len("sub-a"), 1);

        let again = handle.next().await.unwrap().unwrap();
        assert_eq!(again.data(), &Bytes::from("m1"));
        again.ack().await.unwrap();
        assert_eq!(service.acked("sub-a"), 1);
        assert_eq!(service.backlog_len("sub-a"), 0);
    }

    #[tokio::test]
    async fn test_dropped_message_is_requeued() {
        // ---
        let service = service();
        let client = service.connector().connect().await.unwrap();
        let handle = client.subscription("sub-a");
        handle.open().await.unwrap();

        client.publish("topic-a", Bytes::from("m1")).await.unwrap();
        drop(handle.next().await);

        assert_eq!(service.backlog_len("sub-a"), 1);
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_handle() {
        // ---
        let service = service();
        let client = service.connector().connect().await.unwrap();
        let handle = client.subscription("sub-a");
        handle.open().await.unwrap();

        let waiter = {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.next().await.is_none() })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        client.close().await.unwrap();

        let ended = timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiting handle was not woken")
            .unwrap();
        assert!(ended);
        assert!(!handle.is_open());
        assert!(client.publish("topic-a", Bytes::from("x")).await.is_err());
    }

    #[tokio::test]
    async fn test_unprovisioned_subscription_fails_to_open() {
        // ---
        let service = service();
        let client = service.connector().connect().await.unwrap();

        assert!(client.subscription("sub-missing").open().await.is_err());
    }
}
