// src/transport/managed/bus.rs

//! Managed-subscription transport: ack/nack routing.
//!
//! ## Naming
//!
//! `topicName = topic_prefix + topic` and
//! `subscriptionName = subscription_prefix + topic`. The subscription is
//! provisioned out-of-band and assumed bound to the topic of the same base
//! name. Listeners are registered under the subscription name.
//!
//! ## Subscription lifecycle
//!
//! Each subscription name gets one handle, created on first `subscribe()`
//! and cached until `destroy()`. A handle is opened when `subscribe()`
//! finds it closed, and gets a **pump** task (its message/error handlers)
//! when none is attached. The pump is attached at most once per handle until
//! it is torn down by `unsubscribe_all()` or by detaching itself.
//!
//! ## Delivery protocol
//!
//! For every message the service routes to this process:
//!
//! - no listener left for the subscription: the pump nacks the message and
//!   detaches, so the service redelivers it, to another consumer now or to
//!   this process after a later `subscribe()`;
//! - otherwise the message is acked, then handed to the first-registered
//!   listener only.
//!
//! The service offers a single logical consumer group per subscription, so
//! broadcast is not supported: a broadcast publish is logged and dropped.
//!
//! A listener removed while its message is between the listener check and
//! the ack still receives that message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use super::service::{
    //
    ManagedClient,
    ManagedConnector,
    ManagedSubscription,
};
use crate::domain::{lock_ignore_poison, shared_registry, SharedRegistry};
use crate::{
    // ---
    log_debug,
    log_error,
    log_info,
    log_warn,
    Bus,
    BusError,
    BusKind,
    BusPtr,
    Listener,
    Result,
};

/// Naming configuration for a managed bus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedConfig {
    pub topic_prefix: String,
    pub subscription_prefix: String,
}

impl ManagedConfig {
    pub fn new(topic_prefix: impl Into<String>, subscription_prefix: impl Into<String>) -> Self {
        Self {
            topic_prefix: topic_prefix.into(),
            subscription_prefix: subscription_prefix.into(),
        }
    }

    pub fn topic_name(&self, topic: &str) -> String {
        format!("{}{topic}", self.topic_prefix)
    }

    pub fn subscription_name(&self, topic: &str) -> String {
        format!("{}{topic}", self.subscription_prefix)
    }
}

//
// Publisher commands
//

enum Cmd {
    //
    Publish { topic_name: String, data: Bytes },
    Close { resp: oneshot::Sender<()> },
}

/// Cached handle for one subscription name.
struct HandleEntry {
    subscription: Arc<dyn ManagedSubscription>,
    pump: Option<JoinHandle<()>>,
}

impl HandleEntry {
    fn is_attached(&self) -> bool {
        self.pump.as_ref().is_some_and(|p| !p.is_finished())
    }

    /// Abort the pump, returning it so the caller can wait for it to end.
    fn detach(&mut self) -> Option<JoinHandle<()>> {
        // ---
        let pump = self.pump.take()?;
        pump.abort();
        Some(pump)
    }
}

/// Managed-service-backed bus.
pub struct ManagedBus {
    // ---
    config: ManagedConfig,
    client: Arc<dyn ManagedClient>,
    registry: SharedRegistry,
    handles: Mutex<HashMap<String, HandleEntry>>,
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    publisher: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl ManagedBus {
    // ---
    /// Connect a client and start the publisher task.
    ///
    /// # Errors
    ///
    /// Returns an error if the connector fails to produce a client.
    pub async fn connect(
        config: ManagedConfig,
        connector: Arc<dyn ManagedConnector>,
    ) -> Result<Self> {
        // ---
        let client = connector.connect().await?;
        log_info!(
            "managed bus connected (topic prefix {:?}, subscription prefix {:?})",
            config.topic_prefix,
            config.subscription_prefix
        );

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let publisher = tokio::spawn(run_publisher(Arc::clone(&client), cmd_rx));

        Ok(Self {
            config,
            client,
            registry: shared_registry(),
            handles: Mutex::new(HashMap::new()),
            cmd_tx,
            publisher: Mutex::new(Some(publisher)),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ManagedConfig {
        &self.config
    }

    /// Whether a pump is currently attached to the handle for `topic`.
    pub async fn is_listening(&self, topic: &str) -> bool {
        // ---
        let name = self.config.subscription_name(topic);
        self.handles
            .lock()
            .await
            .get(&name)
            .is_some_and(HandleEntry::is_attached)
    }
}

#[async_trait::async_trait]
impl Bus for ManagedBus {
    // ---
    fn kind(&self) -> BusKind {
        BusKind::Managed
    }

    async fn publish(&self, topic: &str, message: Bytes, broadcast: bool) {
        // ---
        if broadcast {
            log_warn!("broadcast is not implemented for the managed transport, dropped ({topic})");
            return;
        }

        let topic_name = self.config.topic_name(topic);
        log_debug!("managed publish {topic_name}");

        let cmd = Cmd::Publish {
            topic_name,
            data: message,
        };
        if self.cmd_tx.send(cmd).is_err() {
            log_warn!("managed publish dropped: bus is closed ({topic})");
        }
    }

    async fn subscribe(&self, topic: &str, listener: Listener) -> Result<()> {
        // ---
        if self.destroyed.load(Ordering::Acquire) {
            return Err(BusError::Destroyed);
        }

        let name = self.config.subscription_name(topic);
        log_debug!("managed subscribe {name}");
        lock_ignore_poison(&self.registry).add(&name, listener);

        let mut handles = self.handles.lock().await;
        let entry = handles
            .entry(name.clone())
            .or_insert_with(|| HandleEntry {
                subscription: self.client.subscription(&name),
                pump: None,
            });

        if !entry.subscription.is_open() {
            entry.subscription.open().await.map_err(|err| {
                log_error!("failed to open subscription {name}: {err}");
                err
            })?;
            log_info!("opened subscription {name}");
        }

        if !entry.is_attached() {
            let pump = run_pump(
                name.clone(),
                Arc::clone(&entry.subscription),
                Arc::clone(&self.registry),
            );
            entry.pump = Some(tokio::spawn(pump));
            log_debug!("attached handlers to {name}");
        }

        Ok(())
    }

    async fn unsubscribe(&self, topic: &str, listener: &Listener) -> bool {
        // ---
        let name = self.config.subscription_name(topic);
        log_debug!("managed unsubscribe {name}");
        lock_ignore_poison(&self.registry).remove(&name, listener)
    }

    async fn unsubscribe_all(&self, topic: Option<&str>) -> usize {
        // ---
        let mut handles = self.handles.lock().await;

        let (removed, pumps): (usize, Vec<_>) = match topic {
            Some(topic) => {
                let name = self.config.subscription_name(topic);
                let removed = lock_ignore_poison(&self.registry).remove_channel(&name);
                let pumps = handles.get_mut(&name).and_then(HandleEntry::detach);
                log_debug!("managed unsubscribe_all {name}: {removed} removed");
                (removed, pumps.into_iter().collect())
            }
            None => {
                let removed = lock_ignore_poison(&self.registry).clear();
                let pumps = handles.values_mut().filter_map(HandleEntry::detach).collect();
                log_debug!("managed unsubscribe_all: {removed} removed");
                (removed, pumps)
            }
        };
        drop(handles);

        // A pump inside a listener call finishes that call before it stops.
        for pump in pumps {
            if let Err(_err) = pump.await {
                if !_err.is_cancelled() {
                    log_error!("managed pump ended abnormally: {_err}");
                }
            }
        }

        removed
    }

    fn listener_count(&self, topic: &str) -> usize {
        lock_ignore_poison(&self.registry).count(&self.config.subscription_name(topic))
    }

    async fn destroy(&self) {
        // ---
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        log_debug!("managed bus destroy");
        self.unsubscribe_all(None).await;
        self.handles.lock().await.clear();

        // Flush publishes queued before destroy, then stop the publisher.
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Cmd::Close { resp: tx }).is_ok() {
            let _ = rx.await;
        }
        if let Some(publisher) = self.publisher.lock().await.take() {
            let _ = publisher.await;
        }

        if let Err(_err) = self.client.close().await {
            log_error!("failed to close managed client: {_err}");
        }
    }
}

/// Sends publishes in submission order; failures are logged.
async fn run_publisher(client: Arc<dyn ManagedClient>, mut cmd_rx: mpsc::UnboundedReceiver<Cmd>) {
    // ---
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Cmd::Publish { topic_name, data } => match client.publish(&topic_name, data).await {
                Ok(_id) => {
                    log_debug!("published message {_id} to {topic_name}");
                }
                Err(_err) => {
                    log_error!("publish to {topic_name} failed: {_err}");
                }
            },
            Cmd::Close { resp } => {
                let _ = resp.send(());
                break;
            }
        }
    }
}

/// Message/error handlers for one subscription handle.
///
/// Returns when the handle closes, or after nacking a message that arrived
/// with no listener registered.
async fn run_pump(
    name: String,
    subscription: Arc<dyn ManagedSubscription>,
    registry: SharedRegistry,
) {
    // ---
    while let Some(delivery) = subscription.next().await {
        let message = match delivery {
            Ok(message) => message,
            Err(_err) => {
                log_error!("subscription {name} error: {_err}");
                continue;
            }
        };

        let first = lock_ignore_poison(&registry).first(&name);

        let Some(listener) = first else {
            log_debug!("no subscriber for {name}, nack {} and detach", message.id());
            if let Err(_err) = message.nack().await {
                log_error!("nack on {name} failed: {_err}");
            }
            return;
        };

        let data = message.data().clone();
        if let Err(_err) = message.ack().await {
            log_error!("ack on {name} failed: {_err}");
            continue;
        }

        listener.call(data);
    }

    log_debug!("subscription {name} closed, handlers detached");
}

/// Create a managed bus over `connector`.
///
/// # Errors
///
/// Returns an error if the connector fails to produce a client.
pub async fn create_managed_bus(
    config: ManagedConfig,
    connector: Arc<dyn ManagedConnector>,
) -> Result<BusPtr> {
    // ---
    let bus = ManagedBus::connect(config, connector).await?;
    Ok(Arc::new(bus))
}
