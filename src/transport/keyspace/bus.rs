// src/transport/keyspace/bus.rs

//! Keyspace transport: distributed unicast via a shared list.
//!
//! ## Concurrency model
//!
//! - A single background **actor task** owns the command connection and the
//!   notification stream.
//! - The actor is responsible for:
//!   - executing outbound publishes in submission order,
//!   - handling inbound notifications one at a time,
//!   - clean shutdown of both connections.
//! - `publish()` only enqueues a command for the actor, so it never waits on
//!   the store.
//!
//! ## Delivery protocol
//!
//! Every channel is `"{prefix}:{db}:{topic}"` and every process listens on
//! the pattern `"{prefix}:{db}:*"`.
//!
//! - Broadcast publish sends the payload verbatim on the channel.
//! - Unicast publish pushes the payload onto the list named after the
//!   channel, then publishes the channel name itself on the channel. That
//!   sentinel tells receivers to pop instead of forwarding.
//!
//! On each notification a process with no local listener for the channel
//! does nothing, leaving any queued payload for another process. Otherwise a
//! payload other than the channel name is forwarded to every local
//! listener, and the sentinel makes the first-registered local listener
//! attempt an atomic `RPOP`. Only one process's pop returns a given item.
//!
//! A broadcast payload that is byte-for-byte equal to the channel name is
//! read as a pop signal. The protocol cannot tell the two apart.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use super::store::{
    //
    KeyspaceCommands,
    KeyspaceConnector,
    Notification,
    NotificationStream,
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

/// Default channel prefix.
pub const DEFAULT_PREFIX: &str = "bus";

/// Naming configuration for a keyspace bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyspaceConfig {
    /// Application prefix of every channel.
    pub prefix: String,
    /// Logical database number folded into the prefix.
    pub db: i64,
}

impl KeyspaceConfig {
    pub fn new(prefix: impl Into<String>, db: i64) -> Self {
        Self {
            prefix: prefix.into(),
            db,
        }
    }

    /// `"{prefix}:{db}:"`, the part shared by every channel of the bus.
    pub fn namespace(&self) -> String {
        format!("{}:{}:", self.prefix, self.db)
    }

    /// Channel name (and list key) for `topic`.
    pub fn channel_name(&self, topic: &str) -> String {
        format!("{}{topic}", self.namespace())
    }

    /// Notification pattern covering every channel of the bus.
    pub fn pattern(&self) -> String {
        format!("{}*", self.namespace())
    }
}

impl Default for KeyspaceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, 0)
    }
}

//
// Actor commands
//

enum Cmd {
    //
    Publish {
        channel: String,
        message: Bytes,
        broadcast: bool,
    },
    Close {
        resp: oneshot::Sender<()>,
    },
}

/// Keyspace-backed bus.
pub struct KeyspaceBus {
    // ---
    config: KeyspaceConfig,
    registry: SharedRegistry,
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    task: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl KeyspaceBus {
    // ---
    /// Open both connections, subscribe to the bus pattern, and start the
    /// actor.
    ///
    /// # Errors
    ///
    /// Returns an error if either connection cannot be established.
    pub async fn connect(
        config: KeyspaceConfig,
        connector: Arc<dyn KeyspaceConnector>,
    ) -> Result<Self> {
        // ---
        let commands = connector.commands().await?;
        let pattern = config.pattern();
        let notifications = connector.psubscribe(&pattern).await?;

        log_info!("keyspace bus listening on {pattern}");

        let registry = shared_registry();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let actor = KeyspaceActor {
            namespace: config.namespace(),
            commands,
            notifications: Some(notifications),
            cmd_rx,
            registry: Arc::clone(&registry),
        };

        let task = tokio::spawn(actor.run());

        Ok(Self {
            config,
            registry,
            cmd_tx,
            task: Mutex::new(Some(task)),
            destroyed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &KeyspaceConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl Bus for KeyspaceBus {
    // ---
    fn kind(&self) -> BusKind {
        BusKind::Keyspace
    }

    async fn publish(&self, topic: &str, message: Bytes, broadcast: bool) {
        // ---
        let channel = self.config.channel_name(topic);
        log_debug!("keyspace publish {channel} broadcast={broadcast}");

        let cmd = Cmd::Publish {
            channel,
            message,
            broadcast,
        };

        if self.cmd_tx.send(cmd).is_err() {
            log_warn!("keyspace publish dropped: bus is closed ({topic})");
        }
    }

    async fn subscribe(&self, topic: &str, listener: Listener) -> Result<()> {
        // ---
        if self.destroyed.load(Ordering::Acquire) {
            return Err(BusError::Destroyed);
        }

        let channel = self.config.channel_name(topic);
        log_debug!("keyspace subscribe {channel}");
        lock_ignore_poison(&self.registry).add(&channel, listener);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str, listener: &Listener) -> bool {
        // ---
        let channel = self.config.channel_name(topic);
        log_debug!("keyspace unsubscribe {channel}");
        lock_ignore_poison(&self.registry).remove(&channel, listener)
    }

    async fn unsubscribe_all(&self, topic: Option<&str>) -> usize {
        // ---
        log_debug!("keyspace unsubscribe_all {topic:?}");

        let mut registry = lock_ignore_poison(&self.registry);
        match topic {
            Some(topic) => registry.remove_channel(&self.config.channel_name(topic)),
            None => registry.clear(),
        }
    }

    fn listener_count(&self, topic: &str) -> usize {
        lock_ignore_poison(&self.registry).count(&self.config.channel_name(topic))
    }

    async fn destroy(&self) {
        // ---
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        log_debug!("keyspace bus destroy");
        self.unsubscribe_all(None).await;

        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Cmd::Close { resp: tx }).is_ok() {
            let _ = rx.await;
        }

        if let Some(task) = self.task.lock().await.take() {
            if let Err(_err) = task.await {
                log_error!("keyspace actor ended abnormally: {_err}");
            }
        }
    }
}

struct KeyspaceActor {
    // ---
    namespace: String, // for logging only
    commands: Arc<dyn KeyspaceCommands>,
    notifications: Option<NotificationStream>,
    cmd_rx: mpsc::UnboundedReceiver<Cmd>,
    registry: SharedRegistry,
}

impl KeyspaceActor {
    // ---
    async fn run(mut self) {
        // ---
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(Cmd::Publish { channel, message, broadcast }) => {
                            self.handle_publish(channel, message, broadcast).await;
                        }
                        Some(Cmd::Close { resp }) => {
                            self.handle_close().await;
                            let _ = resp.send(());
                            break;
                        }
                        None => {
                            self.handle_close().await;
                            break;
                        }
                    }
                }

                note = next_notification(&mut self.notifications), if self.notifications.is_some() => {
                    match note {
                        Some(note) => self.handle_notification(note).await,
                        None => {
                            // notification connection lost; publishes still work
                            log_error!("{}: notification stream ended", self.namespace);
                            self.notifications = None;
                        }
                    }
                }
            }
        }

        log_debug!("{}: keyspace actor stopped", self.namespace);
    }

    /// Broadcast goes out verbatim; unicast is queued, then signalled with
    /// the channel name as payload.
    async fn handle_publish(&mut self, channel: String, message: Bytes, broadcast: bool) {
        // ---
        if broadcast {
            if let Err(_err) = self.commands.publish(&channel, message).await {
                log_error!("publish error on {channel}: {_err}");
            }
            return;
        }

        if let Err(_err) = self.commands.lpush(&channel, message).await {
            log_error!("lpush error on {channel}: {_err}");
            return;
        }

        let signal = Bytes::from(channel.clone());
        if let Err(_err) = self.commands.publish(&channel, signal).await {
            log_error!("publish signal error on {channel}: {_err}");
        }
    }

    async fn handle_notification(&mut self, note: Notification) {
        // ---
        let Notification { channel, payload } = note;

        let listeners = lock_ignore_poison(&self.registry).all(&channel);

        let Some(first) = listeners.first().cloned() else {
            log_debug!("ignore notification: no subscriber! {channel}");
            return;
        };

        if payload.as_ref() != channel.as_bytes() {
            log_debug!("forward to all subscribers! {channel}");
            for listener in listeners {
                listener.call(payload.clone());
            }
            return;
        }

        match self.commands.rpop(&channel).await {
            Ok(Some(message)) => {
                log_debug!("forward to the first subscriber! {channel}");
                first.call(message);
            }
            Ok(None) => {
                log_debug!("nothing to forward, claimed elsewhere: {channel}");
            }
            Err(_err) => {
                log_warn!("rpop error on {channel}: {_err}");
            }
        }
    }

    async fn handle_close(&mut self) {
        // ---
        self.notifications = None;
        if let Err(_err) = self.commands.close().await {
            log_error!("{}: failed to close command connection: {_err}", self.namespace);
        }
        log_debug!("{}: connections closed", self.namespace);
    }
}

async fn next_notification(stream: &mut Option<NotificationStream>) -> Option<Notification> {
    match stream {
        Some(stream) => stream.next().await,
        None => None,
    }
}

/// Create a keyspace bus over `connector`.
///
/// # Errors
///
/// Returns an error if either connection cannot be established.
pub async fn create_keyspace_bus(
    config: KeyspaceConfig,
    connector: Arc<dyn KeyspaceConnector>,
) -> Result<BusPtr> {
    // ---
    let bus = KeyspaceBus::connect(config, connector).await?;
    Ok(Arc::new(bus))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_channel_naming() {
        // ---
        let config = KeyspaceConfig::new("app", 3);

        assert_eq!(config.namespace(), "app:3:");
        assert_eq!(config.channel_name("hello"), "app:3:hello");
        assert_eq!(config.pattern(), "app:3:*");
        assert_eq!(KeyspaceConfig::default().channel_name("x"), "bus:0:x");
    }
}
