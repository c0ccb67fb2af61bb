//! Bus builder and transport selector.
//!
//! Provides a fluent builder API for constructing a bus. The transport is
//! picked once, at `build()` time, in this order:
//!
//! 1. an explicit type tag ([`BusBuilder::transport_type`] or
//!    [`BusBuilder::kind`]),
//! 2. the [`TRANSPORT_ENV_VAR`] environment variable,
//! 3. the shape of the supplied options: a keyspace connector or Redis URL
//!    means keyspace, a managed connector means managed.
//!
//! If none of these names a transport, `build()` fails with
//! [`BusError::NoTransport`].

use std::sync::Arc;

use crate::{
    // ---
    create_keyspace_bus,
    create_local_bus,
    create_managed_bus,
    create_redis_connector,
    log_debug,
    log_info,
    BusError,
    BusKind,
    BusPtr,
    KeyspaceConfig,
    KeyspaceConnector,
    ManagedConfig,
    ManagedConnector,
    Result,
    DEFAULT_PREFIX,
};

/// Environment variable naming the transport when no type tag is given.
pub const TRANSPORT_ENV_VAR: &str = "FASTBUS_TRANSPORT";

/// Which transport-specific construction hooks the options carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptionShape {
    /// A keyspace connector or a Redis URL was supplied.
    pub keyspace_hook: bool,
    /// A managed-service connector was supplied.
    pub managed_hook: bool,
}

/// Pick a transport from a type tag, an environment override, and the
/// option shape, in that order.
///
/// An empty environment value counts as unset. A tag or override that
/// names no transport is an error, not a fall-through.
///
/// # Errors
///
/// - [`BusError::UnknownTransport`] for an unrecognized tag or override
/// - [`BusError::AmbiguousTransport`] when the shape names both transports
/// - [`BusError::NoTransport`] when nothing selects a transport
///
/// ```
/// use fastbus::{select_kind, BusKind, OptionShape};
///
/// let shape = OptionShape { keyspace_hook: true, managed_hook: false };
/// assert_eq!(select_kind(None, None, &shape).unwrap(), BusKind::Keyspace);
/// assert_eq!(select_kind(Some("local"), Some("managed"), &shape).unwrap(), BusKind::Local);
/// ```
pub fn select_kind(
    explicit: Option<&str>,
    env: Option<&str>,
    shape: &OptionShape,
) -> Result<BusKind> {
    // ---
    if let Some(tag) = explicit {
        return tag.parse();
    }

    if let Some(tag) = env.map(str::trim).filter(|tag| !tag.is_empty()) {
        return tag.parse();
    }

    match (shape.keyspace_hook, shape.managed_hook) {
        (true, false) => Ok(BusKind::Keyspace),
        (false, true) => Ok(BusKind::Managed),
        (true, true) => Err(BusError::AmbiguousTransport(
            "both keyspace and managed connectors supplied".into(),
        )),
        (false, false) => Err(BusError::NoTransport),
    }
}

/// Builder for creating bus instances.
///
/// # Examples
///
/// ## In-process bus
/// ```
/// use fastbus::BusBuilder;
///
/// # async fn example() -> fastbus::Result<()> {
/// let bus = BusBuilder::new().transport_type("local").build().await?;
/// # Ok(())
/// # }
/// ```
///
/// ## Keyspace bus on an in-memory store
/// ```
/// use fastbus::{BusBuilder, MemoryKeyspace};
///
/// # async fn example() -> fastbus::Result<()> {
/// let store = MemoryKeyspace::new();
/// let bus = BusBuilder::new()
///     .prefix("app")
///     .db(2)
///     .keyspace_connector(store.connector()) // shape selects keyspace
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct BusBuilder {
    transport_type: Option<String>,

    // keyspace
    prefix: Option<String>,
    db: i64,
    redis_url: Option<String>,
    keyspace_connector: Option<Arc<dyn KeyspaceConnector>>,

    // managed
    topic_prefix: Option<String>,
    subscription_prefix: Option<String>,
    managed_connector: Option<Arc<dyn ManagedConnector>>,
}

impl BusBuilder {
    /// Create a new bus builder.
    pub fn new() -> Self {
        Self {
            transport_type: None,
            prefix: None,
            db: 0,
            redis_url: None,
            keyspace_connector: None,
            topic_prefix: None,
            subscription_prefix: None,
            managed_connector: None,
        }
    }

    /// Set explicit transport type.
    ///
    /// Valid values: `"local"`, `"keyspace"`, `"managed"` and their aliases
    /// (see [`BusKind`]). Takes precedence over [`TRANSPORT_ENV_VAR`].
    pub fn transport_type(mut self, flag: impl Into<String>) -> Self {
        self.transport_type = Some(flag.into());
        self
    }

    /// Set explicit transport kind.
    pub fn kind(self, kind: BusKind) -> Self {
        self.transport_type(kind.as_str())
    }

    /// Keyspace channel prefix (default `"bus"`).
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Keyspace database selector (default `0`).
    pub fn db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// Redis server URL for the keyspace transport.
    ///
    /// Ignored when a keyspace connector is also set.
    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = Some(url.into());
        self
    }

    /// Connector producing the keyspace store connections.
    pub fn keyspace_connector(mut self, connector: Arc<dyn KeyspaceConnector>) -> Self {
        self.keyspace_connector = Some(connector);
        self
    }

    /// Prefix of managed topic names (default empty).
    pub fn topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = Some(prefix.into());
        self
    }

    /// Prefix of managed subscription names (default empty).
    pub fn subscription_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subscription_prefix = Some(prefix.into());
        self
    }

    /// Connector producing the managed-service client.
    pub fn managed_connector(mut self, connector: Arc<dyn ManagedConnector>) -> Self {
        self.managed_connector = Some(connector);
        self
    }

    fn shape(&self) -> OptionShape {
        OptionShape {
            keyspace_hook: self.keyspace_connector.is_some() || self.redis_url.is_some(),
            managed_hook: self.managed_connector.is_some(),
        }
    }

    /// Build the bus (consumes self).
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - No transport can be selected, or the selection is ambiguous
    /// - The type tag or environment override is unrecognized
    /// - The managed transport is selected without a connector
    /// - Transport creation fails
    pub async fn build(self) -> Result<BusPtr> {
        // ---
        let env = std::env::var(TRANSPORT_ENV_VAR).ok();
        let kind = select_kind(self.transport_type.as_deref(), env.as_deref(), &self.shape())?;
        log_info!("building {kind} bus");

        match kind {
            BusKind::Local => Ok(create_local_bus()),

            BusKind::Keyspace => {
                let config = KeyspaceConfig::new(
                    self.prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string()),
                    self.db,
                );
                let connector = match self.keyspace_connector {
                    Some(connector) => connector,
                    None => {
                        log_debug!("no keyspace connector supplied, using redis");
                        create_redis_connector(self.redis_url.as_deref(), self.db)?
                    }
                };
                create_keyspace_bus(config, connector).await
            }

            BusKind::Managed => {
                let connector = self.managed_connector.ok_or_else(|| {
                    BusError::MissingConfig("managed transport requires a managed_connector".into())
                })?;
                let config = ManagedConfig::new(
                    self.topic_prefix.unwrap_or_default(),
                    self.subscription_prefix.unwrap_or_default(),
                );
                create_managed_bus(config, connector).await
            }
        }
    }
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    const KEYSPACE: OptionShape = OptionShape {
        keyspace_hook: true,
        managed_hook: false,
    };
    const MANAGED: OptionShape = OptionShape {
        keyspace_hook: false,
        managed_hook: true,
    };
    const BOTH: OptionShape = OptionShape {
        keyspace_hook: true,
        managed_hook: true,
    };
    const NONE: OptionShape = OptionShape {
        keyspace_hook: false,
        managed_hook: false,
    };

    #[test]
    fn test_explicit_tag_wins() {
        // ---
        let kind = select_kind(Some("managed"), Some("local"), &KEYSPACE).unwrap();
        assert_eq!(kind, BusKind::Managed);
    }

    #[test]
    fn test_env_beats_shape() {
        // ---
        let kind = select_kind(None, Some("redis"), &MANAGED).unwrap();
        assert_eq!(kind, BusKind::Keyspace);
    }

    #[test]
    fn test_blank_env_is_ignored() {
        // ---
        let kind = select_kind(None, Some("  "), &MANAGED).unwrap();
        assert_eq!(kind, BusKind::Managed);
    }

    #[test]
    fn test_shape_inference() {
        // ---
        assert_eq!(select_kind(None, None, &KEYSPACE).unwrap(), BusKind::Keyspace);
        assert_eq!(select_kind(None, None, &MANAGED).unwrap(), BusKind::Managed);
    }

    #[test]
    fn test_no_transport() {
        // ---
        let err = select_kind(None, None, &NONE).unwrap_err();
        assert!(matches!(err, BusError::NoTransport));
    }

    #[test]
    fn test_ambiguous_shape() {
        // ---
        let err = select_kind(None, None, &BOTH).unwrap_err();
        assert!(matches!(err, BusError::AmbiguousTransport(_)));
    }

    #[test]
    fn test_unknown_tag_does_not_fall_through() {
        // ---
        let err = select_kind(Some("kafka"), Some("local"), &KEYSPACE).unwrap_err();
        assert!(matches!(err, BusError::UnknownTransport(ref tag) if tag == "kafka"));

        let err = select_kind(None, Some("zmq"), &KEYSPACE).unwrap_err();
        assert!(matches!(err, BusError::UnknownTransport(_)));
    }

    #[test]
    fn test_builder_shape() {
        // ---
        let builder = BusBuilder::new().redis_url("redis://localhost");
        assert_eq!(builder.shape(), KEYSPACE);
        assert_eq!(BusBuilder::new().shape(), NONE);
    }
}
