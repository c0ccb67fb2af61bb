//! Keyspace-and-notification transport.
//!
//! This module contains the keyspace bus and the stores it can run on:
//! - redis - Redis via the `redis` library (redis.rs)
//! - memory - in-process store for tests and single-node use (memory.rs)

mod bus;
mod memory;
mod store;

#[cfg(feature = "transport_redis")]
mod redis;

pub use bus::{create_keyspace_bus, KeyspaceBus, KeyspaceConfig, DEFAULT_PREFIX};
pub use memory::MemoryKeyspace;
pub use store::{
    //
    KeyspaceCommands,
    KeyspaceConnector,
    Notification,
    NotificationStream,
};

#[cfg(feature = "transport_redis")]
pub use redis::{RedisConnector, DEFAULT_REDIS_URL};

/// Connector for the Redis server at `url` (or [`DEFAULT_REDIS_URL`]).
#[cfg(feature = "transport_redis")]
pub fn create_redis_connector(
    url: Option<&str>,
    db: i64,
) -> crate::Result<std::sync::Arc<dyn KeyspaceConnector>> {
    // ---
    let connector = RedisConnector::open(url.unwrap_or(DEFAULT_REDIS_URL), db)?;
    Ok(std::sync::Arc::new(connector))
}

#[cfg(not(feature = "transport_redis"))]
pub fn create_redis_connector(
    _url: Option<&str>,
    _db: i64,
) -> crate::Result<std::sync::Arc<dyn KeyspaceConnector>> {
    Err(crate::BusError::MissingConfig(
        "keyspace connector (transport_redis feature is not enabled)".into(),
    ))
}
