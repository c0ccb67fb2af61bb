//! Transport implementations.
//!
//! This module provides concrete implementations of the domain-level
//! `Bus` trait, one per backing system. Each transport is exposed through
//! a `create_*` constructor returning a [`BusPtr`](crate::BusPtr).
//!
//! Domain code must not depend on transport-specific types.

mod keyspace;
mod local;
mod managed;

pub use local::{create_local_bus, LocalBus};

pub use keyspace::{
    //
    create_keyspace_bus,
    create_redis_connector,
    KeyspaceBus,
    KeyspaceCommands,
    KeyspaceConfig,
    KeyspaceConnector,
    MemoryKeyspace,
    Notification,
    NotificationStream,
    DEFAULT_PREFIX,
};

#[cfg(feature = "transport_redis")]
pub use keyspace::{RedisConnector, DEFAULT_REDIS_URL};

pub use managed::{
    //
    create_managed_bus,
    AckReply,
    ManagedBus,
    ManagedClient,
    ManagedConfig,
    ManagedConnector,
    ManagedSubscription,
    MemoryPubSub,
    ReceivedMessage,
};
