// src/transport/keyspace/memory.rs

//! In-memory keyspace store.
//!
//! Simulates a Redis-like store within a single process: lists with atomic
//! pops and glob-pattern notifications. Any number of [`KeyspaceBus`]
//! instances may share one [`MemoryKeyspace`], exactly as processes
//! connected to one real store would, which makes cross-process unicast
//! behavior testable without a server.
//!
//! [`KeyspaceBus`]: crate::KeyspaceBus

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::store::{
    //
    KeyspaceCommands,
    KeyspaceConnector,
    Notification,
    NotificationStream,
};
use crate::domain::lock_ignore_poison;
use crate::{log_debug, BusError, Result};

#[derive(Default)]
struct KeyspaceState {
    lists: HashMap<String, VecDeque<Bytes>>,
    subscribers: Vec<(String, mpsc::UnboundedSender<Notification>)>,
}

/// Shared in-memory store.
///
/// All operations take a single lock, so `rpop` is atomic with respect to
/// every connection of the hub.
#[derive(Default)]
pub struct MemoryKeyspace {
    state: Mutex<KeyspaceState>,
}

impl MemoryKeyspace {
    /// Create a new, empty store.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Connector handing out connections to this store.
    pub fn connector(self: &Arc<Self>) -> Arc<dyn KeyspaceConnector> {
        Arc::new(MemoryKeyspaceConnector {
            hub: Arc::clone(self),
        })
    }

    /// Push at the head of `key`, returning the new length.
    pub fn lpush(&self, key: &str, value: Bytes) -> usize {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let list = state.lists.entry(key.to_string()).or_default();
        list.push_front(value);
        list.len()
    }

    /// Pop from the tail of `key`.
    pub fn rpop(&self, key: &str) -> Option<Bytes> {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        let list = state.lists.get_mut(key)?;
        let value = list.pop_back();
        if list.is_empty() {
            state.lists.remove(key);
        }
        value
    }

    /// Publish on `channel`, returning the number of pattern subscribers
    /// that received it.
    pub fn publish(&self, channel: &str, payload: Bytes) -> usize {
        // ---
        let mut state = lock_ignore_poison(&self.state);
        state.subscribers.retain(|(_, tx)| !tx.is_closed());

        let mut receivers = 0;
        for (pattern, tx) in &state.subscribers {
            if glob_match(pattern.as_bytes(), channel.as_bytes()) {
                let note = Notification {
                    channel: channel.to_string(),
                    payload: payload.clone(),
                };
                if tx.send(note).is_ok() {
                    receivers += 1;
                }
            }
        }
        receivers
    }

    /// Subscribe to every channel matching the glob `pattern`.
    pub fn psubscribe(&self, pattern: &str) -> NotificationStream {
        // ---
        let (tx, rx) = mpsc::unbounded_channel();
        lock_ignore_poison(&self.state)
            .subscribers
            .push((pattern.to_string(), tx));

        futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|note| (note, rx))
        })
        .boxed()
    }

    /// Length of the list at `key`.
    pub fn list_len(&self, key: &str) -> usize {
        lock_ignore_poison(&self.state)
            .lists
            .get(key)
            .map_or(0, VecDeque::len)
    }

    /// Drop every list. Pattern subscriptions are kept.
    pub fn flush(&self) {
        lock_ignore_poison(&self.state).lists.clear();
    }
}

struct MemoryKeyspaceConnector {
    hub: Arc<MemoryKeyspace>,
}

#[async_trait::async_trait]
impl KeyspaceConnector for MemoryKeyspaceConnector {
    // ---
    async fn commands(&self) -> Result<Arc<dyn KeyspaceCommands>> {
        Ok(Arc::new(MemoryKeyspaceConnection {
            hub: Arc::clone(&self.hub),
            closed: AtomicBool::new(false),
        }))
    }

    async fn psubscribe(&self, pattern: &str) -> Result<NotificationStream> {
        // ---
        log_debug!("memory keyspace: psubscribe {pattern}");
        Ok(self.hub.psubscribe(pattern))
    }
}

struct MemoryKeyspaceConnection {
    hub: Arc<MemoryKeyspace>,
    closed: AtomicBool,
}

impl MemoryKeyspaceConnection {
    fn check_open(&self) -> Result<()> {
        // ---
        if self.closed.load(Ordering::Acquire) {
            return Err(BusError::Transport(
                "memory keyspace: connection closed".into(),
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl KeyspaceCommands for MemoryKeyspaceConnection {
    // ---
    async fn lpush(&self, key: &str, value: Bytes) -> Result<()> {
        self.check_open()?;
        self.hub.lpush(key, value);
        Ok(())
    }

    async fn rpop(&self, key: &str) -> Result<Option<Bytes>> {
        self.check_open()?;
        Ok(self.hub.rpop(key))
    }

    async fn publish(&self, channel: &str, payload: Bytes) -> Result<()> {
        self.check_open()?;
        self.hub.publish(channel, payload);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Redis-style glob match supporting `*`, `?`, `[...]` and `\` escapes.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    // ---
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|i| glob_match(rest, &text[i..])),
        Some((b'?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((b'[', rest)) => {
            let Some((&c, text_rest)) = text.split_first() else {
                return false;
            };
            let Some(end) = rest.iter().position(|&b| b == b']') else {
                // unterminated class matches a literal '['
                return c == b'[' && glob_match(rest, text_rest);
            };
            let (class, after) = (&rest[..end], &rest[end + 1..]);
            let (negate, class) = match class.split_first() {
                Some((b'^', tail)) => (true, tail),
                _ => (false, class),
            };
            class_contains(class, c) != negate && glob_match(after, text_rest)
        }
        Some((b'\\', rest)) if !rest.is_empty() => {
            text.first() == Some(&rest[0]) && glob_match(&rest[1..], &text[1..])
        }
        Some((&p, rest)) => text.first() == Some(&p) && glob_match(rest, &text[1..]),
    }
}

fn class_contains(class: &[u8], c: u8) -> bool {
    // ---
    let mut i = 0;
    while i < class.len() {
        if i + 2 < class.len() && class[i + 1] == b'-' {
            let (lo, hi) = (class[i].min(class[i + 2]), class[i].max(class[i + 2]));
            if (lo..=hi).contains(&c) {
                return true;
            }
            i += 3;
        } else {
            if class[i] == c {
                return true;
            }
            i += 1;
        }
    }
    false
}
