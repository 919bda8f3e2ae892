//! Best-effort event fan-out to live viewers.

use std::sync::Arc;

use tracing::debug;

use super::model::RealtimeEvent;
use super::registry::SessionRegistry;

/// Pushes events to one viewer or to every viewer.
///
/// Delivery is at-most-once with no acknowledgment; a viewer whose socket
/// has gone away simply misses the event.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    registry: Arc<SessionRegistry>,
}

impl EventBroadcaster {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Send to every live session. Returns how many accepted the event.
    pub async fn emit_to_all(&self, event: RealtimeEvent) -> usize {
        let sessions = self.registry.sessions().await;
        let mut delivered = 0;
        for (viewer_id, handle) in &sessions {
            if handle.send(event.clone()) {
                delivered += 1;
            } else {
                debug!(viewer_id = %viewer_id, event = event.name(), "Viewer gone, event dropped");
            }
        }
        debug!(event = event.name(), delivered, sessions = sessions.len(), "Broadcast event");
        delivered
    }

    /// Send to one viewer. A viewer without a session is a no-op.
    pub async fn emit_to_viewer(&self, viewer_id: &str, event: RealtimeEvent) -> bool {
        let Some(handle) = self.registry.lookup(viewer_id).await else {
            debug!(viewer_id, event = event.name(), "No session for viewer, event dropped");
            return false;
        };
        let name = event.name();
        let sent = handle.send(event);
        debug!(viewer_id, event = name, sent, "Emitted event to viewer");
        sent
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::realtime::registry::SessionHandle;

    fn connected(viewer: &str) -> RealtimeEvent {
        RealtimeEvent::Connected {
            viewer_id: viewer.into(),
            connection_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn emit_to_all_reaches_every_session() {
        let registry = Arc::new(SessionRegistry::new());
        let (a, mut rx_a) = SessionHandle::channel();
        let (b, mut rx_b) = SessionHandle::channel();
        registry.register("a", a).await;
        registry.register("b", b).await;

        let broadcaster = EventBroadcaster::new(registry);
        assert_eq!(broadcaster.emit_to_all(connected("x")).await, 2);
        assert_eq!(rx_a.recv().await.unwrap().name(), "connected");
        assert_eq!(rx_b.recv().await.unwrap().name(), "connected");
    }

    #[tokio::test]
    async fn emit_to_viewer_only_reaches_that_viewer() {
        let registry = Arc::new(SessionRegistry::new());
        let (a, mut rx_a) = SessionHandle::channel();
        let (b, mut rx_b) = SessionHandle::channel();
        registry.register("a", a).await;
        registry.register("b", b).await;

        let broadcaster = EventBroadcaster::new(registry);
        assert!(broadcaster.emit_to_viewer("a", connected("a")).await);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn absent_viewer_is_a_noop() {
        let broadcaster = EventBroadcaster::new(Arc::new(SessionRegistry::new()));
        assert!(!broadcaster.emit_to_viewer("nobody", connected("nobody")).await);
        assert_eq!(broadcaster.emit_to_all(connected("x")).await, 0);
    }

    #[tokio::test]
    async fn closed_session_is_skipped() {
        let registry = Arc::new(SessionRegistry::new());
        let (a, rx_a) = SessionHandle::channel();
        let (b, mut rx_b) = SessionHandle::channel();
        registry.register("a", a).await;
        registry.register("b", b).await;
        drop(rx_a);

        let broadcaster = EventBroadcaster::new(registry);
        assert_eq!(broadcaster.emit_to_all(connected("x")).await, 1);
        assert!(rx_b.recv().await.is_some());
    }
}
