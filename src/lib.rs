//! Topic publish/subscribe over interchangeable transports
//!
//! This library provides one message-bus contract with two delivery modes,
//! unicast (exactly one listener consumes each message) and broadcast (every
//! listener receives every message), implemented over an in-process
//! registry, a Redis-like keyspace store, and a managed publish/subscribe
//! service. The transport is picked at construction time by [`BusBuilder`].
//!

// Import all sub modules once...
mod macros;

mod domain;
mod transport;

mod bus_builder;
mod error;

pub(crate) use macros::{log_debug, log_error, log_info, log_warn};

// Re-export main types
pub use bus_builder::{select_kind, BusBuilder, OptionShape, TRANSPORT_ENV_VAR};
pub use error::{BusError, Result};

// --- public re-exports
pub use domain::{
    //
    Bus,
    BusKind,
    BusPtr,
    Listener,
    ListenerRegistry,
};

pub use transport::{
    //
    create_keyspace_bus,
    create_local_bus,
    create_managed_bus,
    create_redis_connector,
    AckReply,
    KeyspaceBus,
    KeyspaceCommands,
    KeyspaceConfig,
    KeyspaceConnector,
    LocalBus,
    ManagedBus,
    ManagedClient,
    ManagedConfig,
    ManagedConnector,
    ManagedSubscription,
    MemoryKeyspace,
    MemoryPubSub,
    Notification,
    NotificationStream,
    ReceivedMessage,
    DEFAULT_PREFIX,
};

#[cfg(feature = "transport_redis")]
pub use transport::{RedisConnector, DEFAULT_REDIS_URL};
