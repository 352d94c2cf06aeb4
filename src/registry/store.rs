//! Subscription registry implementation
//!
//! The map from task id to the set of open push connections for that task.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::entry::{Connection, TaskEntry, TaskStats};
use super::key::{ConnectionId, TaskId};

/// Registry of live subscribers, keyed by task
///
/// The map only ever holds non-empty subscriber sets: an entry is created on
/// first subscribe and removed as soon as its last subscriber leaves, so
/// absence of an entry means "no one is listening".
///
/// Thread-safe via `RwLock`. Every mutation takes the write lock, which keeps
/// mutations of a single task's entry mutually exclusive.
pub struct SubscriptionRegistry<C: ?Sized> {
    tasks: RwLock<HashMap<TaskId, TaskEntry<C>>>,
}

impl<C: Connection + ?Sized> SubscriptionRegistry<C> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection under a task
    ///
    /// Creates the entry if absent. Idempotent for the same connection.
    pub async fn subscribe(&self, task_id: &TaskId, connection: Arc<C>) {
        let mut tasks = self.tasks.write().await;
        let connection_id = connection.connection_id();

        let entry = tasks.entry(task_id.clone()).or_insert_with(TaskEntry::new);
        let added = entry.insert(connection);

        if added {
            tracing::info!(
                task_id = %task_id,
                connection = %connection_id,
                subscribers = entry.len(),
                "Subscriber added"
            );
        } else {
            tracing::debug!(
                task_id = %task_id,
                connection = %connection_id,
                "Subscriber already registered"
            );
        }
    }

    /// Remove a connection from a task
    ///
    /// Deletes the entry when it becomes empty. A no-op when the connection
    /// or the entry is already gone, since close/error races are expected.
    /// Returns the removed connection, if any.
    pub async fn unsubscribe(&self, task_id: &TaskId, connection_id: ConnectionId) -> Option<Arc<C>> {
        let mut tasks = self.tasks.write().await;

        let entry = tasks.get_mut(task_id)?;
        let removed = entry.remove(connection_id);
        let remaining = entry.len();

        if remaining == 0 {
            tasks.remove(task_id);
        }

        if removed.is_some() {
            tracing::debug!(
                task_id = %task_id,
                connection = %connection_id,
                remaining = remaining,
                "Subscriber removed"
            );
        }

        removed
    }

    /// Remove a whole task entry, returning its connections
    pub async fn remove_task(&self, task_id: &TaskId) -> Vec<Arc<C>> {
        let mut tasks = self.tasks.write().await;

        match tasks.remove(task_id) {
            Some(entry) => entry.into_connections(),
            None => Vec::new(),
        }
    }

    /// Number of live subscribers for a task (0 when absent)
    pub async fn count(&self, task_id: &TaskId) -> usize {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Snapshot of the live connections for a task, empty if none
    pub async fn list(&self, task_id: &TaskId) -> Vec<Arc<C>> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .map(|entry| entry.snapshot())
            .unwrap_or_default()
    }

    /// Look up one connection of a task
    pub async fn get(&self, task_id: &TaskId, connection_id: ConnectionId) -> Option<Arc<C>> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .and_then(|entry| entry.get(connection_id).cloned())
    }

    /// Whether a task has an entry (at least one subscriber)
    pub async fn contains(&self, task_id: &TaskId) -> bool {
        self.tasks.read().await.contains_key(task_id)
    }

    /// Task ids with at least one subscriber, sorted
    pub async fn task_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.tasks.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of tasks with at least one subscriber
    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Total subscribers across all tasks
    pub async fn total_subscribers(&self) -> usize {
        self.tasks.read().await.values().map(|e| e.len()).sum()
    }

    /// Statistics for one task
    pub async fn task_stats(&self, task_id: &TaskId) -> Option<TaskStats> {
        self.tasks.read().await.get(task_id).map(|entry| TaskStats {
            subscriber_count: entry.len(),
            age: entry.created_at.elapsed(),
        })
    }

    /// Snapshot of every (task, connections) pair
    pub async fn snapshot_all(&self) -> Vec<(TaskId, Vec<Arc<C>>)> {
        self.tasks
            .read()
            .await
            .iter()
            .map(|(id, entry)| (id.clone(), entry.snapshot()))
            .collect()
    }
}

impl<C: Connection + ?Sized> Default for SubscriptionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
