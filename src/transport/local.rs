//! In-process transport implementation.
//!
//! This module provides a pure in-process implementation of the domain-level
//! `Bus` trait. It is intended for single-node deployments, testing, and as
//! the reference for delivery semantics.
//!
//! ## Reference Semantics
//!
//! - Unicast publish invokes only the first-registered listener of the topic.
//! - Broadcast publish invokes every registered listener in registration order.
//! - Listeners run synchronously inside `publish()`.
//! - A message published while no listener is registered is dropped.
//!
//! ## Non-Goals
//!
//! No persistence, no network, no cross-process delivery.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::domain::{lock_ignore_poison, shared_registry, SharedRegistry};
use crate::{
    // ---
    log_debug,
    Bus,
    BusError,
    BusKind,
    BusPtr,
    Listener,
    Result,
};

/// In-process bus.
///
/// Topics are used verbatim as channel names.
pub struct LocalBus {
    // ---
    registry: SharedRegistry,
    destroyed: AtomicBool,
}

impl LocalBus {
    pub fn new() -> Self {
        // ---
        log_debug!("create local bus");

        Self {
            registry: shared_registry(),
            destroyed: AtomicBool::new(false),
        }
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Bus for LocalBus {
    // ---
    fn kind(&self) -> BusKind {
        BusKind::Local
    }

    async fn publish(&self, topic: &str, message: Bytes, broadcast: bool) {
        // ---
        log_debug!("local publish {topic} broadcast={broadcast}");

        if self.destroyed.load(Ordering::Acquire) {
            log_debug!("ignore publish on destroyed bus: {topic}");
            return;
        }

        // Listeners run outside the lock so they may call back into the bus.
        let targets = {
            let registry = lock_ignore_poison(&self.registry);
            if broadcast {
                registry.all(topic)
            } else {
                registry.first(topic).into_iter().collect()
            }
        };

        if targets.is_empty() {
            log_debug!("ignore publish: no subscriber! {topic}");
            return;
        }

        for listener in targets {
            listener.call(message.clone());
        }
    }

    async fn subscribe(&self, topic: &str, listener: Listener) -> Result<()> {
        // ---
        if self.destroyed.load(Ordering::Acquire) {
            return Err(BusError::Destroyed);
        }

        log_debug!("local subscribe {topic}");
        lock_ignore_poison(&self.registry).add(topic, listener);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str, listener: &Listener) -> bool {
        // ---
        log_debug!("local unsubscribe {topic}");
        lock_ignore_poison(&self.registry).remove(topic, listener)
    }

    async fn unsubscribe_all(&self, topic: Option<&str>) -> usize {
        // ---
        let mut registry = lock_ignore_poison(&self.registry);
        match topic {
            Some(topic) => registry.remove_channel(topic),
            None => registry.clear(),
        }
    }

    fn listener_count(&self, topic: &str) -> usize {
        lock_ignore_poison(&self.registry).count(topic)
    }

    async fn destroy(&self) {
        // ---
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        let _removed = self.unsubscribe_all(None).await;
        log_debug!("local bus destroyed, {_removed} listener(s) removed");
    }
}

/// Create a new in-process bus.
///
/// This transport is always available and requires no external resources.
pub fn create_local_bus() -> BusPtr {
    Arc::new(LocalBus::new())
}
