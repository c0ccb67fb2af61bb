// src/domain/registry.rs

//! Local listener registry.
//!
//! Maps a channel name to the listeners registered under it, in
//! registration order. The first entry of a channel is the unicast winner
//! within a process. Each transport owns its own registry; there is no
//! process-wide instance.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::Listener;

/// Registry shared between a bus handle and its background tasks.
pub(crate) type SharedRegistry = Arc<Mutex<ListenerRegistry>>;

/// Ordered listener lists keyed by channel name.
#[derive(Debug, Default)]
pub struct ListenerRegistry {
    channels: HashMap<String, Vec<Listener>>,
}

impl ListenerRegistry {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `listener` to the channel's list.
    pub fn add(&mut self, channel: &str, listener: Listener) {
        // ---
        self.channels
            .entry(channel.to_string())
            .or_default()
            .push(listener);
    }

    /// Remove one registration of `listener`.
    ///
    /// When the listener is registered more than once, the most recent
    /// registration goes first so the earlier one keeps its position.
    pub fn remove(&mut self, channel: &str, listener: &Listener) -> bool {
        // ---
        let Some(listeners) = self.channels.get_mut(channel) else {
            return false;
        };

        let Some(pos) = listeners.iter().rposition(|l| l == listener) else {
            return false;
        };

        listeners.remove(pos);
        if listeners.is_empty() {
            self.channels.remove(channel);
        }
        true
    }

    /// Drop every listener of `channel`, returning how many were removed.
    pub fn remove_channel(&mut self, channel: &str) -> usize {
        self.channels.remove(channel).map_or(0, |l| l.len())
    }

    /// Drop every listener of every channel.
    pub fn clear(&mut self) -> usize {
        // ---
        let removed = self.channels.values().map(Vec::len).sum();
        self.channels.clear();
        removed
    }

    pub fn first(&self, channel: &str) -> Option<Listener> {
        self.channels.get(channel).and_then(|l| l.first().cloned())
    }

    pub fn all(&self, channel: &str) -> Vec<Listener> {
        self.channels.get(channel).cloned().unwrap_or_default()
    }

    pub fn count(&self, channel: &str) -> usize {
        self.channels.get(channel).map_or(0, Vec::len)
    }

    /// Channels with at least one listener.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

pub(crate) fn shared_registry() -> SharedRegistry {
    Arc::new(Mutex::new(ListenerRegistry::new()))
}

/// Acquire mutex guard, ignoring poisoning
pub(crate) fn lock_ignore_poison<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_first_registered_wins() {
        // ---
        let mut registry = ListenerRegistry::new();
        let l1 = Listener::new(|_| {});
        let l2 = Listener::new(|_| {});

        registry.add("bus:0:hello", l1.clone());
        registry.add("bus:0:hello", l2.clone());

        assert_eq!(registry.first("bus:0:hello"), Some(l1.clone()));
        assert_eq!(registry.all("bus:0:hello"), vec![l1.clone(), l2.clone()]);

        assert!(registry.remove("bus:0:hello", &l1));
        assert_eq!(registry.first("bus:0:hello"), Some(l2));
    }

    #[test]
    fn test_remove_reports_outcome() {
        // ---
        let mut registry = ListenerRegistry::new();
        let listener = Listener::new(|_| {});

        assert!(!registry.remove("a", &listener));

        registry.add("a", listener.clone());
        assert!(registry.remove("a", &listener));
        assert!(!registry.remove("a", &listener));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_registration_removed_one_at_a_time() {
        // ---
        let mut registry = ListenerRegistry::new();
        let dup = Listener::new(|_| {});
        let other = Listener::new(|_| {});

        registry.add("a", dup.clone());
        registry.add("a", other.clone());
        registry.add("a", dup.clone());
        assert_eq!(registry.count("a"), 3);

        assert!(registry.remove("a", &dup));
        assert_eq!(registry.all("a"), vec![dup.clone(), other]);
        assert_eq!(registry.first("a"), Some(dup));
    }

    #[test]
    fn test_remove_channel_and_clear() {
        // ---
        let mut registry = ListenerRegistry::new();
        registry.add("a", Listener::new(|_| {}));
        registry.add("a", Listener::new(|_| {}));
        registry.add("b", Listener::new(|_| {}));

        assert_eq!(registry.remove_channel("a"), 2);
        assert_eq!(registry.remove_channel("a"), 0);
        assert_eq!(registry.channels().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(registry.clear(), 1);
        assert_eq!(registry.count("b"), 0);
    }
}
