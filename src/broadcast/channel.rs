//! Broadcast channel implementation
//!
//! Fans progress payloads out to every subscriber of a task and owns the
//! subscriber lifecycle: handshake, teardown on close/error, eviction of
//! failed writers and forced termination.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio_util::task::AbortOnDropHandle;

use crate::error::{Error, Result};
use crate::registry::{SubscriptionRegistry, TaskId};
use crate::stats::ChannelStats;

use super::frame::{
    comment_frame, encode_payload, EventFrame, CONNECTED_COMMENT, KEEP_ALIVE_COMMENT, SSE_HEADERS,
    SSE_REDECLARED_HEADERS,
};
use super::transport::{CloseReason, PushTransport, WriteError};

/// A registered push connection
pub type Subscriber = Arc<dyn PushTransport>;

/// Per-task SSE broadcast channel
///
/// Fan-out iterates a snapshot of the subscriber set. Connections whose
/// write fails are collected and evicted only after the loop, so a
/// disconnect never mutates the set being iterated.
pub struct BroadcastChannel {
    registry: Arc<SubscriptionRegistry<dyn PushTransport>>,
}

impl BroadcastChannel {
    /// Create a channel with an empty registry
    pub fn new() -> Self {
        Self {
            registry: Arc::new(SubscriptionRegistry::new()),
        }
    }

    /// Underlying subscription registry
    pub fn registry(&self) -> &Arc<SubscriptionRegistry<dyn PushTransport>> {
        &self.registry
    }

    /// Complete the SSE handshake and register the connection
    ///
    /// Writes the status line and SSE headers unless an upstream layer
    /// already sent them (then only the content-type/cache/keep-alive headers
    /// are re-declared), writes the initial comment frame, subscribes, and
    /// spawns a watcher that unsubscribes on close or error.
    pub async fn accept_subscription(&self, task_id: &TaskId, connection: Subscriber) -> Result<()> {
        let connection_id = connection.connection_id();

        if let Err(e) = handshake(connection.as_ref()) {
            tracing::warn!(
                task_id = %task_id,
                connection = %connection_id,
                error = %e,
                "SSE handshake failed"
            );
            let _ = connection.end();
            return Err(Error::SubscriberWriteFailure {
                connection: connection_id,
                reason: e.to_string(),
            });
        }

        self.registry
            .subscribe(task_id, Arc::clone(&connection))
            .await;

        let registry = Arc::clone(&self.registry);
        let task_id = task_id.clone();
        tokio::spawn(async move {
            match connection.closed().await {
                CloseReason::Closed => {
                    tracing::debug!(task_id = %task_id, connection = %connection_id, "Subscriber closed");
                }
                CloseReason::Error(e) => {
                    tracing::warn!(
                        task_id = %task_id,
                        connection = %connection_id,
                        error = %e,
                        "Subscriber transport error"
                    );
                }
            }
            registry.unsubscribe(&task_id, connection_id).await;
        });

        Ok(())
    }

    /// Send a payload to every subscriber of a task
    ///
    /// Returns the number of subscribers the frame reached. A task with no
    /// subscribers is a no-op.
    pub async fn broadcast<T: Serialize + ?Sized>(&self, task_id: &TaskId, payload: &T) -> Result<usize> {
        let subscribers = self.registry.list(task_id).await;
        if subscribers.is_empty() {
            return Ok(0);
        }

        let frame = EventFrame::data(encode_payload(payload)?).to_bytes();
        Ok(self.deliver(task_id, subscribers, frame).await)
    }

    /// Send a payload tagged with an event name
    pub async fn send_named_event<T: Serialize + ?Sized>(
        &self,
        task_id: &TaskId,
        event_name: &str,
        payload: &T,
    ) -> Result<usize> {
        let subscribers = self.registry.list(task_id).await;
        if subscribers.is_empty() {
            return Ok(0);
        }

        let frame = EventFrame::named(event_name, encode_payload(payload)?).to_bytes();
        Ok(self.deliver(task_id, subscribers, frame).await)
    }

    /// Send a comment frame (ignored by SSE clients, keeps proxies awake)
    pub async fn send_comment(&self, task_id: &TaskId, text: &str) -> usize {
        let subscribers = self.registry.list(task_id).await;
        if subscribers.is_empty() {
            return 0;
        }
        self.deliver(task_id, subscribers, comment_frame(text)).await
    }

    async fn deliver(&self, task_id: &TaskId, subscribers: Vec<Subscriber>, frame: Bytes) -> usize {
        let mut delivered = 0;
        let mut failed: Vec<Subscriber> = Vec::new();

        for subscriber in &subscribers {
            match subscriber.write(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        task_id = %task_id,
                        connection = %subscriber.connection_id(),
                        error = %e,
                        "Write to subscriber failed"
                    );
                    failed.push(Arc::clone(subscriber));
                }
            }
        }

        for subscriber in failed {
            self.registry
                .unsubscribe(task_id, subscriber.connection_id())
                .await;
            if let Err(e) = subscriber.end() {
                tracing::debug!(
                    connection = %subscriber.connection_id(),
                    error = %e,
                    "Terminating evicted subscriber failed"
                );
            }
        }

        delivered
    }

    /// Terminate one subscriber
    ///
    /// The connection is removed from the registry if it is still there and
    /// ended either way, so a connection evicted or never registered is
    /// still terminated. An end failure is only logged.
    pub async fn close_subscriber(&self, task_id: &TaskId, subscriber: &Subscriber) {
        let connection_id = subscriber.connection_id();
        if self.registry.unsubscribe(task_id, connection_id).await.is_none() {
            tracing::debug!(task_id = %task_id, connection = %connection_id, "Closing unregistered subscriber");
        }

        if let Err(e) = subscriber.end() {
            tracing::warn!(
                task_id = %task_id,
                connection = %connection_id,
                error = %e,
                "Error closing subscriber"
            );
        }
    }

    /// Terminate every subscriber of a task and drop its entry
    pub async fn close_all_subscribers(&self, task_id: &TaskId) {
        let subscribers = self.registry.remove_task(task_id).await;
        if subscribers.is_empty() {
            return;
        }

        for subscriber in &subscribers {
            if let Err(e) = subscriber.end() {
                tracing::warn!(
                    task_id = %task_id,
                    connection = %subscriber.connection_id(),
                    error = %e,
                    "Error closing subscriber"
                );
            }
        }

        tracing::info!(
            task_id = %task_id,
            closed = subscribers.len(),
            "Closed all subscribers"
        );
    }

    /// Terminate every subscriber of every task
    pub async fn close_all(&self) {
        for task_id in self.registry.task_ids().await {
            self.close_all_subscribers(&task_id).await;
        }
    }

    /// Number of live subscribers for a task
    pub async fn subscriber_count(&self, task_id: &TaskId) -> usize {
        self.registry.count(task_id).await
    }

    /// Observability snapshot; no side effects
    pub async fn stats(&self) -> ChannelStats {
        let snapshot = self.registry.snapshot_all().await;

        let mut task_ids: Vec<TaskId> = snapshot.iter().map(|(id, _)| id.clone()).collect();
        task_ids.sort();

        ChannelStats {
            active_tasks: snapshot.len(),
            total_subscribers: snapshot.iter().map(|(_, subs)| subs.len()).sum(),
            task_ids,
        }
    }

    /// Spawn a task that periodically sends a keep-alive comment to every
    /// subscriber of every task
    ///
    /// The task stops when the returned handle is aborted or dropped.
    pub fn spawn_keep_alive_task(self: &Arc<Self>, interval: Duration) -> AbortOnDropHandle<()> {
        let channel = Arc::clone(self);

        AbortOnDropHandle::new(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                for task_id in channel.registry.task_ids().await {
                    channel.send_comment(&task_id, KEEP_ALIVE_COMMENT).await;
                }
            }
        }))
    }
}

impl Default for BroadcastChannel {
    fn default() -> Self {
        Self::new()
    }
}

fn handshake(connection: &dyn PushTransport) -> std::result::Result<(), WriteError> {
    if connection.headers_sent() {
        for (name, value) in SSE_REDECLARED_HEADERS {
            connection.set_header(name, value)?;
        }
    } else {
        connection.write_head(200, &SSE_HEADERS)?;
    }
    connection.write(comment_frame(CONNECTED_COMMENT))
}
