// src/transport/keyspace/store.rs

//! Narrow interface to a keyspace-and-notification store.
//!
//! The keyspace bus needs exactly three things from its backing store:
//!
//! - a durable list keyed by string, pushed at one end and popped from the
//!   other, where the pop is atomic across concurrent connections,
//! - a fire-and-forget `PUBLISH` on a named channel,
//! - a pattern subscription (`PSUBSCRIBE`) that yields every notification
//!   whose channel matches the pattern.
//!
//! Commands and notifications use separate connections; a connection in
//! subscription mode cannot issue regular commands.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::BoxStream;

use crate::Result;

/// A message received on a pattern subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Concrete channel the message was published on.
    pub channel: String,
    pub payload: Bytes,
}

/// Stream of notifications for one pattern subscription.
///
/// Dropping the stream closes the notification connection.
pub type NotificationStream = BoxStream<'static, Notification>;

/// Command connection to the store.
#[async_trait::async_trait]
pub trait KeyspaceCommands: Send + Sync {
    // ---
    /// Insert `value` at the head of the list at `key`.
    async fn lpush(&self, key: &str, value: Bytes) -> Result<()>;

    /// Atomically remove and return the tail of the list at `key`.
    ///
    /// Paired with [`lpush`](Self::lpush) this yields oldest-first order.
    async fn rpop(&self, key: &str) -> Result<Option<Bytes>>;

    /// Publish `payload` on `channel`.
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()>;

    /// Close the connection. Later commands fail.
    async fn close(&self) -> Result<()>;
}

/// Factory for store connections.
///
/// This is the injection point for custom connection parameters and for
/// tests; see [`RedisConnector`](crate::RedisConnector) and
/// [`MemoryKeyspace`](crate::MemoryKeyspace).
#[async_trait::async_trait]
pub trait KeyspaceConnector: Send + Sync {
    // ---
    /// Open a command connection.
    async fn commands(&self) -> Result<Arc<dyn KeyspaceCommands>>;

    /// Open a notification connection subscribed to `pattern`.
    ///
    /// Returns once the subscription is confirmed by the store.
    async fn psubscribe(&self, pattern: &str) -> Result<NotificationStream>;
}
