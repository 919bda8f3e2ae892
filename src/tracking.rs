//! Per-message delivery lifecycle tracking.
//!
//! Lifecycles are created when the gateway accepts a send and advance only
//! forward as status callbacks arrive. Callbacks for ids this process never
//! dispatched are ignored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::gateway::DispatchResult;
use crate::pipeline::types::{DeliveryStatus, StatusErrorDetail, StatusEvent};

/// Tracked state of one outbound message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageLifecycle {
    pub message_id: String,
    pub destination: String,
    pub state: DeliveryStatus,
    pub dispatched_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Viewer that initiated the send, if any. Status events are routed there.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<StatusErrorDetail>,
}

/// Result of applying a status callback.
#[derive(Debug, Clone, PartialEq)]
pub enum ApplyOutcome {
    /// The lifecycle moved forward; carries the updated snapshot.
    Advanced(MessageLifecycle),
    /// The event was at or behind the current stage.
    Stale { current: DeliveryStatus },
    /// No lifecycle exists for this id.
    Unknown,
}

/// In-memory lifecycle table shared across request handlers.
#[derive(Debug, Default)]
pub struct StatusTracker {
    lifecycles: RwLock<HashMap<String, MessageLifecycle>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a dispatched message in state `sent`.
    pub async fn record(&self, dispatch: &DispatchResult) -> MessageLifecycle {
        self.record_for(dispatch, None).await
    }

    /// Start tracking a message on behalf of a viewer.
    ///
    /// Recording the same id twice resets it to `sent`.
    pub async fn record_for(
        &self,
        dispatch: &DispatchResult,
        viewer_id: Option<&str>,
    ) -> MessageLifecycle {
        let lifecycle = MessageLifecycle {
            message_id: dispatch.provider_message_id.clone(),
            destination: dispatch.destination.clone(),
            state: DeliveryStatus::Sent,
            dispatched_at: dispatch.sent_at,
            updated_at: dispatch.sent_at,
            viewer_id: viewer_id.map(str::to_string),
            errors: Vec::new(),
        };

        self.lifecycles
            .write()
            .await
            .insert(lifecycle.message_id.clone(), lifecycle.clone());
        debug!(message_id = %lifecycle.message_id, "Tracking outbound message");
        lifecycle
    }

    /// Advance a lifecycle with a status callback.
    pub async fn apply(&self, event: &StatusEvent) -> ApplyOutcome {
        let mut lifecycles = self.lifecycles.write().await;

        let Some(lifecycle) = lifecycles.get_mut(&event.id) else {
            debug!(message_id = %event.id, status = %event.status, "Status for untracked message ignored");
            return ApplyOutcome::Unknown;
        };

        if !lifecycle.state.can_advance_to(event.status) {
            debug!(
                message_id = %event.id,
                current = %lifecycle.state,
                incoming = %event.status,
                "Stale status ignored"
            );
            return ApplyOutcome::Stale {
                current: lifecycle.state,
            };
        }

        lifecycle.state = event.status;
        lifecycle.updated_at = event.timestamp;
        if !event.errors.is_empty() {
            lifecycle.errors = event.errors.clone();
        }
        ApplyOutcome::Advanced(lifecycle.clone())
    }

    pub async fn current(&self, message_id: &str) -> Option<MessageLifecycle> {
        self.lifecycles.read().await.get(message_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.lifecycles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.lifecycles.read().await.is_empty()
    }

    /// Drop lifecycles whose last update is older than `retention`.
    /// Returns the number removed.
    pub async fn prune_older_than(&self, retention: Duration) -> usize {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return 0;
        };
        let cutoff = Utc::now() - retention;

        let mut lifecycles = self.lifecycles.write().await;
        let before = lifecycles.len();
        lifecycles.retain(|_, l| l.updated_at >= cutoff);
        let removed = before - lifecycles.len();

        if removed > 0 {
            info!(removed, remaining = lifecycles.len(), "Pruned tracked lifecycles");
        }
        removed
    }
}

/// Spawn a background task that periodically prunes expired lifecycles.
pub fn spawn_prune_task(
    tracker: Arc<StatusTracker>,
    retention: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            tracker.prune_older_than(retention).await;
        }
    })
}
