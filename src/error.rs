use thiserror::Error;

/// Errors surfaced by bus construction and subscription.
///
/// Publishing never returns one of these; publish-path failures are
/// logged and dropped.
#[derive(Error, Debug)]
pub enum BusError {
    /// No transport could be selected from type tag, environment, or options.
    #[error("no selectable transport: set a transport type, FASTBUS_TRANSPORT, or a connector")]
    NoTransport,

    /// Options carry construction hooks for more than one transport.
    #[error("ambiguous transport options: {0}")]
    AmbiguousTransport(String),

    /// A type tag or environment override names no known transport.
    #[error("unrecognized transport type: {0}, valid values: local, keyspace, managed")]
    UnknownTransport(String),

    /// The selected transport is missing a required option.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Failure reported by a backing connection or service.
    #[error("transport error: {0}")]
    Transport(String),

    /// Redis client error
    #[cfg(feature = "transport_redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The bus has been destroyed and cannot be used again.
    #[error("bus destroyed")]
    Destroyed,
}

/// Result type alias for bus operations
pub type Result<T> = std::result::Result<T, BusError>;
