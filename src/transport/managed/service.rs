// src/transport/managed/service.rs

//! Narrow interface to a managed publish/subscribe service.
//!
//! The managed bus consumes a Cloud Pub/Sub-like service through these
//! traits only. Topics and subscriptions are provisioned out-of-band; the
//! bus never creates or deletes them.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::Result;

/// Settles one delivered message with the service.
#[async_trait::async_trait]
pub trait AckReply: Send {
    /// Commit consumption of the message.
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Return the message to the service for redelivery.
    async fn nack(self: Box<Self>) -> Result<()>;
}

/// A message delivered to a subscription handle.
///
/// Exactly one of [`ack`](Self::ack) or [`nack`](Self::nack) should be
/// called. A message dropped without either is left to the service's ack
/// deadline.
pub struct ReceivedMessage {
    id: String,
    data: Bytes,
    reply: Box<dyn AckReply>,
}

impl ReceivedMessage {
    pub fn new(id: impl Into<String>, data: Bytes, reply: Box<dyn AckReply>) -> Self {
        Self {
            id: id.into(),
            data,
            reply,
        }
    }

    /// Service-assigned message id.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub async fn ack(self) -> Result<()> {
        self.reply.ack().await
    }

    pub async fn nack(self) -> Result<()> {
        self.reply.nack().await
    }
}

impl fmt::Debug for ReceivedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceivedMessage")
            .field("id", &self.id)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Handle on one named subscription.
///
/// A handle starts closed. While open, [`next`](Self::next) yields the
/// messages the service routes to it.
#[async_trait::async_trait]
pub trait ManagedSubscription: Send + Sync {
    // ---
    fn name(&self) -> &str;

    /// Whether the handle is currently open and listening.
    fn is_open(&self) -> bool;

    /// Start listening. Opening an open handle is a no-op.
    async fn open(&self) -> Result<()>;

    /// Wait for the next delivery.
    ///
    /// `Some(Err(_))` reports an asynchronous error without ending the
    /// stream. `None` means the handle is closed.
    async fn next(&self) -> Option<Result<ReceivedMessage>>;

    /// Stop listening. Messages not yet delivered stay with the service.
    async fn close(&self) -> Result<()>;
}

/// Client connection to the managed service.
#[async_trait::async_trait]
pub trait ManagedClient: Send + Sync {
    // ---
    /// Publish `data` to `topic`, returning the service-assigned id.
    async fn publish(&self, topic: &str, data: Bytes) -> Result<String>;

    /// Handle for the subscription named `name`, initially closed.
    fn subscription(&self, name: &str) -> Arc<dyn ManagedSubscription>;

    /// Close the client and every handle it created.
    async fn close(&self) -> Result<()>;
}

/// Factory for managed-service clients.
///
/// Callers supply their own connector to bind the bus to a real service;
/// [`MemoryPubSub`](crate::MemoryPubSub) provides an in-process one.
#[async_trait::async_trait]
pub trait ManagedConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ManagedClient>>;
}
