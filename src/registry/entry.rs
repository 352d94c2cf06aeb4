//! Registry entry types
//!
//! This module defines the per-task subscriber set stored in the registry.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use super::key::ConnectionId;

/// Anything the registry can hold: it only needs a stable identity
pub trait Connection: Send + Sync {
    /// Identity used for set membership
    fn connection_id(&self) -> ConnectionId;
}

/// Set of live subscribers for a single task
///
/// Membership is keyed by [`ConnectionId`], so registering the same
/// connection twice has the effect of registering it once.
pub struct TaskEntry<C: ?Sized> {
    /// Live connections
    subscribers: HashMap<ConnectionId, Arc<C>>,

    /// When the first subscriber arrived
    pub created_at: Instant,
}

impl<C: Connection + ?Sized> TaskEntry<C> {
    /// Create an empty entry
    pub(super) fn new() -> Self {
        Self {
            subscribers: HashMap::new(),
            created_at: Instant::now(),
        }
    }

    /// Insert a connection; returns `false` if it was already present
    pub(super) fn insert(&mut self, connection: Arc<C>) -> bool {
        let id = connection.connection_id();
        if self.subscribers.contains_key(&id) {
            return false;
        }
        self.subscribers.insert(id, connection);
        true
    }

    /// Remove a connection by id
    pub(super) fn remove(&mut self, id: ConnectionId) -> Option<Arc<C>> {
        self.subscribers.remove(&id)
    }

    /// Number of live subscribers
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Look up a connection by id
    pub fn get(&self, id: ConnectionId) -> Option<&Arc<C>> {
        self.subscribers.get(&id)
    }

    /// Snapshot of the live connections
    pub fn snapshot(&self) -> Vec<Arc<C>> {
        self.subscribers.values().cloned().collect()
    }

    /// Consume the entry, yielding every connection
    pub(super) fn into_connections(self) -> Vec<Arc<C>> {
        self.subscribers.into_values().collect()
    }
}

/// Statistics for one task entry
#[derive(Debug, Clone)]
pub struct TaskStats {
    /// Number of live subscribers
    pub subscriber_count: usize,
    /// How long the entry has existed
    pub age: std::time::Duration,
}
