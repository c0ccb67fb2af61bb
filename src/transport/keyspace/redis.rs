//! Redis connector for the keyspace transport, using `redis`.
//!
//! ## Two connections required
//!
//! Redis mandates a dedicated connection for Pub/Sub: a connection in
//! Pub/Sub mode cannot issue regular commands like `LPUSH`. Two async
//! connections are therefore opened:
//!
//! - commands: a `MultiplexedConnection` used for `LPUSH`, `RPOP` and
//!   `PUBLISH`,
//! - notifications: an `aio::PubSub` connection placed in `PSUBSCRIBE`
//!   mode and consumed as a message stream.
//!
//! ## Database selector
//!
//! Redis pub/sub ignores the selected database, so the keyspace bus folds
//! the db number into its channel prefix. The connector also selects that
//! db for the command connection so the durable lists live in it.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::IntoConnectionInfo;

use super::store::{
    //
    KeyspaceCommands,
    KeyspaceConnector,
    Notification,
    NotificationStream,
};
use crate::domain::lock_ignore_poison;
use crate::{log_debug, log_error, log_info, BusError, Result};

/// Redis URL used when none is configured.
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// [`KeyspaceConnector`] backed by a Redis server.
pub struct RedisConnector {
    client: redis::Client,
}

impl RedisConnector {
    /// Create a connector for `url`, selecting database `db`.
    ///
    /// No connection is made until the bus asks for one.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn open(url: &str, db: i64) -> Result<Self> {
        // ---
        let mut info = url.into_connection_info().map_err(|err| {
            let msg = format!("redis: invalid URL {url}: {err}");
            log_error!("{msg}");
            BusError::MissingConfig(msg)
        })?;
        info.redis.db = db;

        let client = redis::Client::open(info)?;
        Ok(Self { client })
    }

    /// Wrap an already-configured client.
    pub fn from_client(client: redis::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl KeyspaceConnector for RedisConnector {
    // ---
    async fn commands(&self) -> Result<Arc<dyn KeyspaceCommands>> {
        // ---
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|err| {
                let msg = format!("redis: failed to connect command connection: {err}");
                log_error!("{msg}");
                BusError::Transport(msg)
            })?;

        log_info!("redis: command connection ready");

        Ok(Arc::new(RedisCommands {
            conn: Mutex::new(Some(conn)),
        }))
    }

    async fn psubscribe(&self, pattern: &str) -> Result<NotificationStream> {
        // ---
        let mut pubsub = self.client.get_async_pubsub().await.map_err(|err| {
            let msg = format!("redis: failed to connect pubsub connection: {err}");
            log_error!("{msg}");
            BusError::Transport(msg)
        })?;

        pubsub.psubscribe(pattern).await.map_err(|err| {
            let msg = format!("redis: failed to psubscribe {pattern}: {err}");
            log_error!("{msg}");
            BusError::Transport(msg)
        })?;

        log_info!("redis: psubscribe {pattern}");

        let stream = pubsub.into_on_message().map(|msg| Notification {
            channel: msg.get_channel_name().to_string(),
            payload: Bytes::copy_from_slice(msg.get_payload_bytes()),
        });

        Ok(stream.boxed())
    }
}

struct RedisCommands {
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisCommands {
    /// Multiplexed connections are cheap to clone; each command uses its own
    /// handle so no lock is held across the round-trip.
    fn conn(&self) -> Result<MultiplexedConnection> {
        lock_ignore_poison(&self.conn)
            .clone()
            .ok_or_else(|| BusError::Transport("redis: connection closed".into()))
    }
}

#[async_trait::async_trait]
impl KeyspaceCommands for RedisCommands {
    // ---
    async fn lpush(&self, key: &str, value: Bytes) -> Result<()> {
        // ---
        let mut conn = self.conn()?;
        let _: i64 = redis::cmd("LPUSH")
            .arg(key)
            .arg(value.as_ref())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn rpop(&self, key: &str) -> Result<Option<Bytes>> {
        // ---
        let mut conn = self.conn()?;
        let value: Option<Vec<u8>> = redis::cmd("RPOP").arg(key).query_async(&mut conn).await?;
        Ok(value.map(Bytes::from))
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        // ---
        let mut conn = self.conn()?;
        let _receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload.as_ref())
            .query_async(&mut conn)
            .await?;
        log_debug!("redis: PUBLISH {channel} reached {_receivers} subscriber(s)");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // ---
        // The socket closes once the last clone of the connection drops.
        lock_ignore_poison(&self.conn).take();
        log_debug!("redis: command connection closed");
        Ok(())
    }
}
