use std::collections::HashMap;

use metrics::gauge;
use shared::models::LiveEvent;
use tokio::sync::{RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

/// The delivery end of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    sender: mpsc::Sender<LiveEvent>,
}

impl ConnectionHandle {
    /// Creates a handle with a fresh connection id and a bounded queue.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<LiveEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                sender,
            },
            receiver,
        )
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Queues `event` without waiting. Returns `false` if the queue is full or closed.
    pub fn try_send(&self, event: LiveEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }
}

/// Maps each user to their single current live connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `handle` as the user's connection, returning the one it replaced.
    pub async fn register(&self, user_id: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let mut guard = self.connections.write().await;
        let previous = guard.insert(user_id.to_string(), handle);
        record_gauge(guard.len());
        previous
    }

    /// Removes the user's entry only if it is still `connection_id`.
    ///
    /// Returns whether an entry was removed; a superseded connection gets `false`.
    pub async fn unregister(&self, user_id: &str, connection_id: Uuid) -> bool {
        self.unregister_with(user_id, connection_id, || async {}).await
    }

    /// Like [`unregister`](Self::unregister), awaiting `on_removed` before the
    /// registry is released when the entry was removed.
    ///
    /// A connection registering for the same user meanwhile waits until
    /// `on_removed` completes, so teardown work it does cannot overtake the
    /// newer connection's setup.
    pub async fn unregister_with<F, Fut>(&self, user_id: &str, connection_id: Uuid, on_removed: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut guard = self.connections.write().await;
        let current = guard.get(user_id).is_some_and(|handle| handle.id == connection_id);
        if !current {
            debug!(user_id, %connection_id, "connection already superseded; leaving registry untouched");
            return false;
        }

        guard.remove(user_id);
        record_gauge(guard.len());
        on_removed().await;
        true
    }

    /// Delivers `event` to the user's connection without blocking.
    ///
    /// Returns `false` when there is no connection or its queue is full or closed.
    pub async fn send(&self, user_id: &str, event: LiveEvent) -> bool {
        let handle = {
            let guard = self.connections.read().await;
            guard.get(user_id).cloned()
        };
        handle.is_some_and(|handle| handle.try_send(event))
    }

    pub async fn is_connected(&self, user_id: &str) -> bool {
        self.connections.read().await.contains_key(user_id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_gauge(connections: usize) {
    gauge!("chatline_live_connections").set(connections as f64);
}
