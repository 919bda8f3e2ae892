//! Viewer id → live connection mapping.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use super::model::RealtimeEvent;

/// Handle to one live connection. Events pushed into `sender` are written
/// out by that connection's socket loop.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub connection_id: Uuid,
    pub sender: mpsc::UnboundedSender<RealtimeEvent>,
    pub connected_at: DateTime<Utc>,
}

impl SessionHandle {
    /// Create a handle and the receiving end its socket loop drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RealtimeEvent>) {
        let (sender, rx) = mpsc::unbounded_channel();
        let handle = Self {
            connection_id: Uuid::new_v4(),
            sender,
            connected_at: Utc::now(),
        };
        (handle, rx)
    }

    /// Queue an event. Returns `false` if the connection is gone.
    pub fn send(&self, event: RealtimeEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

/// At most one session per viewer id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `viewer_id` to `handle`, returning any session it replaced.
    pub async fn register(&self, viewer_id: &str, handle: SessionHandle) -> Option<SessionHandle> {
        let connection_id = handle.connection_id;
        let replaced = self
            .sessions
            .write()
            .await
            .insert(viewer_id.to_string(), handle);

        match &replaced {
            Some(old) => info!(
                viewer_id,
                connection_id = %connection_id,
                replaced = %old.connection_id,
                "Viewer reconnected, previous session replaced"
            ),
            None => info!(viewer_id, connection_id = %connection_id, "Viewer session registered"),
        }
        replaced
    }

    /// Remove the viewer's session. Idempotent.
    pub async fn unregister(&self, viewer_id: &str) -> Option<SessionHandle> {
        let removed = self.sessions.write().await.remove(viewer_id);
        if removed.is_some() {
            info!(viewer_id, "Viewer session unregistered");
        }
        removed
    }

    /// Remove the viewer's session only if it is still `connection_id`.
    ///
    /// A socket closing after its viewer reconnected must not evict the
    /// newer session.
    pub async fn unregister_connection(&self, viewer_id: &str, connection_id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(viewer_id) {
            Some(current) if current.connection_id == connection_id => {
                sessions.remove(viewer_id);
                info!(viewer_id, connection_id = %connection_id, "Viewer session unregistered");
                true
            }
            Some(_) => {
                debug!(viewer_id, connection_id = %connection_id, "Stale disconnect ignored");
                false
            }
            None => false,
        }
    }

    pub async fn lookup(&self, viewer_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(viewer_id).cloned()
    }

    /// Snapshot of every live session.
    pub async fn sessions(&self) -> Vec<(String, SessionHandle)> {
        self.sessions
            .read()
            .await
            .iter()
            .map(|(id, handle)| (id.clone(), handle.clone()))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn register_and_lookup() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = SessionHandle::channel();
        let id = handle.connection_id;

        assert!(registry.register("v1", handle).await.is_none());
        assert_eq!(registry.lookup("v1").await.unwrap().connection_id, id);
        assert!(registry.lookup("v2").await.is_none());
    }

    #[tokio::test]
    async fn later_register_replaces_prior_mapping() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = SessionHandle::channel();
        let (second, _rx2) = SessionHandle::channel();
        let first_id = first.connection_id;
        let second_id = second.connection_id;

        registry.register("v1", first).await;
        let replaced = registry.register("v1", second).await.unwrap();
        assert_eq!(replaced.connection_id, first_id);
        assert_eq!(registry.lookup("v1").await.unwrap().connection_id, second_id);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let (handle, _rx) = SessionHandle::channel();
        registry.register("v1", handle).await;

        assert!(registry.unregister("v1").await.is_some());
        assert!(registry.unregister("v1").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn stale_connection_does_not_evict_replacement() {
        let registry = SessionRegistry::new();
        let (old, _rx1) = SessionHandle::channel();
        let (new, _rx2) = SessionHandle::channel();
        let old_id = old.connection_id;
        let new_id = new.connection_id;

        registry.register("v1", old).await;
        registry.register("v1", new).await;

        assert!(!registry.unregister_connection("v1", old_id).await);
        assert_eq!(registry.lookup("v1").await.unwrap().connection_id, new_id);
        assert!(registry.unregister_connection("v1", new_id).await);
        assert!(registry.lookup("v1").await.is_none());
    }

    #[tokio::test]
    async fn concurrent_connects_and_disconnects() {
        let registry = Arc::new(SessionRegistry::new());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                let viewer = format!("v{}", i % 8);
                let (handle, _rx) = SessionHandle::channel();
                let id = handle.connection_id;
                registry.register(&viewer, handle).await;
                registry.lookup(&viewer).await;
                if i % 2 == 0 {
                    registry.unregister_connection(&viewer, id).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert!(registry.len().await <= 8);
    }
}
