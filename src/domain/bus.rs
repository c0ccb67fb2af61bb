// src/domain/bus.rs

//! Bus domain abstractions.
//!
//! This module defines the contract every transport implements. It
//! intentionally avoids any reference to concrete brokers or client
//! libraries; implementations live under `src/transport/`.
//!
//! Two delivery modes are part of the contract:
//!
//! - **Unicast** (`broadcast = false`): exactly one registered listener,
//!   across every process sharing the bus, consumes the message.
//! - **Broadcast** (`broadcast = true`): every registered listener in every
//!   process receives the message.
//!
//! How each transport realizes these guarantees is documented on the
//! transport itself.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;

use crate::{BusError, Result};

type ListenerFn = dyn Fn(Bytes) + Send + Sync;

/// A message callback registered under a topic.
///
/// Listeners are compared by identity, not by behavior: a clone of a
/// `Listener` is the same listener, while two `Listener::new` calls with
/// identical closures are different listeners. Registering the same
/// listener twice yields two registrations.
///
/// Listener invocation is synchronous; a listener must not block.
///
/// ```
/// # use fastbus::Listener;
/// let listener = Listener::new(|message| println!("got {message:?}"));
/// let same = listener.clone();
/// assert_eq!(listener, same);
/// assert_ne!(listener, Listener::new(|_| {}));
/// ```
#[derive(Clone)]
pub struct Listener(Arc<ListenerFn>);

impl Listener {
    /// Wrap a closure as a listener.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        Listener(Arc::new(f))
    }

    pub(crate) fn call(&self, message: Bytes) {
        (self.0)(message)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", self.addr())
    }
}

/// Transport selected for a bus.
///
/// Parsed from a transport-type tag or the `FASTBUS_TRANSPORT` environment
/// variable; see [`BusBuilder`](crate::BusBuilder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusKind {
    /// Single-process listener registry, no network.
    Local,

    /// Durable list plus pattern notifications on a Redis-like store.
    Keyspace,

    /// Ack/nack routing over a managed publish/subscribe service.
    Managed,
}

impl BusKind {
    /// Canonical tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            BusKind::Local => "local",
            BusKind::Keyspace => "keyspace",
            BusKind::Managed => "managed",
        }
    }
}

impl FromStr for BusKind {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self> {
        // ---
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "memory" => Ok(BusKind::Local),
            "keyspace" | "redis" => Ok(BusKind::Keyspace),
            "managed" | "pubsub" | "cloud-pubsub" => Ok(BusKind::Managed),
            _ => Err(BusError::UnknownTransport(s.to_string())),
        }
    }
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message bus abstraction.
///
/// Implementations must ensure that:
/// - `publish()` never fails from the caller's point of view and never
///   waits on subscribers or on a broker round-trip.
/// - Once `subscribe()` returns, messages published afterwards for that
///   topic are deliverable to the listener.
/// - After `unsubscribe()` returns, messages published afterwards never
///   reach the removed registration.
/// - After `destroy()` returns, no listener fires.
///
/// # Notes
///
/// This trait uses `async_trait`; consumers should treat methods as normal
/// `async fn`s.
#[async_trait::async_trait]
pub trait Bus: Send + Sync {
    // ---
    /// Which transport backs this bus.
    fn kind(&self) -> BusKind;

    /// Send `message` to `topic`.
    ///
    /// `broadcast` selects fan-out to every listener instead of delivery to
    /// a single one. Failures are logged, never returned.
    async fn publish(&self, topic: &str, message: Bytes, broadcast: bool);

    /// Register `listener` for future messages on `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Destroyed`] after `destroy()`, or a transport
    /// error when a backing subscription cannot be opened. In the latter
    /// case the listener stays registered.
    async fn subscribe(&self, topic: &str, listener: Listener) -> Result<()>;

    /// Remove one registration of `listener` for `topic`.
    ///
    /// Returns whether a registration was removed.
    async fn unsubscribe(&self, topic: &str, listener: &Listener) -> bool;

    /// Remove every listener for `topic`, or for all topics when `None`.
    ///
    /// Returns the number of registrations removed.
    async fn unsubscribe_all(&self, topic: Option<&str>) -> usize;

    /// Number of local registrations for `topic`.
    fn listener_count(&self, topic: &str) -> usize;

    /// Unsubscribe everything and release transport resources.
    ///
    /// Calling it again is a no-op. The bus is not reusable afterwards.
    async fn destroy(&self);
}

/// Shared bus pointer.
///
/// `.clone()` is cheap and all clones share the same transport connections.
pub type BusPtr = Arc<dyn Bus>;

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_listener_identity() {
        // ---
        let a = Listener::new(|_| {});
        let b = Listener::new(|_| {});

        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_bus_kind_aliases() {
        // ---
        assert_eq!("memory".parse::<BusKind>().unwrap(), BusKind::Local);
        assert_eq!("Redis".parse::<BusKind>().unwrap(), BusKind::Keyspace);
        assert_eq!(
            " cloud-pubsub ".parse::<BusKind>().unwrap(),
            BusKind::Managed
        );
        assert!(matches!(
            "kafka".parse::<BusKind>(),
            Err(BusError::UnknownTransport(_))
        ));
    }
}
