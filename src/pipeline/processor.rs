//! Message processor: drives each webhook batch through mark-read,
//! broadcast, rule matching, dispatch and status tracking.
//!
//! Each message in a batch is handled in its own task. The batch's statuses
//! share one task and are applied in delivery order, so viewers never see
//! a lifecycle step backwards. A failure in one task never cancels or
//! blocks its siblings, and the webhook handler does not wait for any of
//! them.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{GatewayError, RulesError};
use crate::gateway::{DispatchResult, MessagingGateway, ProviderStatus, TemplateMessage};
use crate::pipeline::rules::{AutoResponseRule, RuleTable, match_response};
use crate::pipeline::types::{DeliveryStatus, InboundMessage, NormalizedBatch, StatusEvent};
use crate::realtime::{AutoResponse, EventBroadcaster, RealtimeEvent, StatusUpdate};
use crate::store::MessageStore;
use crate::tracking::{ApplyOutcome, MessageLifecycle, StatusTracker};

/// What happened to one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Broadcast, no rule matched.
    Received,
    /// A rule matched and the reply was dispatched.
    AutoReplied { provider_message_id: String },
    /// A rule matched but the dispatch failed.
    ReplyFailed { reason: String },
}

/// What happened to one status event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusOutcome {
    Broadcast,
    Stale,
    Unknown,
}

/// Per-batch tally, mostly for logs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub messages: usize,
    pub auto_replies: usize,
    pub reply_failures: usize,
    pub statuses_broadcast: usize,
    pub statuses_ignored: usize,
    /// Tasks that panicked.
    pub task_failures: usize,
}

/// A caller-initiated outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text {
        destination: String,
        body: String,
    },
    Image {
        destination: String,
        media_url: String,
        caption: Option<String>,
    },
}

impl OutboundMessage {
    fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Image { .. } => "image",
        }
    }

    fn body(&self) -> Option<&str> {
        match self {
            Self::Text { body, .. } => Some(body),
            Self::Image { caption, .. } => caption.as_deref(),
        }
    }
}

/// Answer to a status lookup.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum StatusLookup {
    /// Known locally.
    Tracked { lifecycle: MessageLifecycle },
    /// Read through to the provider.
    Provider { status: ProviderStatus },
}

enum Task {
    Message(MessageOutcome),
    Statuses(Vec<StatusOutcome>),
}

/// Composes the gateway, rule table, broadcaster, tracker and store.
pub struct MessageProcessor {
    gateway: Arc<dyn MessagingGateway>,
    rules: RwLock<Arc<RuleTable>>,
    broadcaster: EventBroadcaster,
    tracker: Arc<StatusTracker>,
    store: Option<Arc<dyn MessageStore>>,
}

impl MessageProcessor {
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        rules: RuleTable,
        broadcaster: EventBroadcaster,
        tracker: Arc<StatusTracker>,
    ) -> Self {
        Self {
            gateway,
            rules: RwLock::new(Arc::new(rules)),
            broadcaster,
            tracker,
            store: None,
        }
    }

    /// Attach a store for best-effort history writes.
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn tracker(&self) -> &Arc<StatusTracker> {
        &self.tracker
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Start processing a batch in the background and return immediately.
    pub fn ingest(self: &Arc<Self>, batch: NormalizedBatch) -> JoinHandle<BatchReport> {
        let processor = Arc::clone(self);
        tokio::spawn(async move { processor.process_batch(batch).await })
    }

    /// Process a batch and wait for every task: messages concurrently,
    /// statuses sequentially in one task alongside them.
    pub async fn process_batch(self: &Arc<Self>, batch: NormalizedBatch) -> BatchReport {
        let mut report = BatchReport::default();
        if batch.is_empty() {
            debug!("Empty webhook batch");
            return report;
        }
        info!(
            messages = batch.messages.len(),
            statuses = batch.statuses.len(),
            "Processing webhook batch"
        );

        let mut tasks = JoinSet::new();
        for message in batch.messages {
            let processor = Arc::clone(self);
            tasks.spawn(async move { Task::Message(processor.handle_message(message).await) });
        }
        if !batch.statuses.is_empty() {
            let processor = Arc::clone(self);
            let events = batch.statuses;
            tasks.spawn(async move {
                let mut outcomes = Vec::with_capacity(events.len());
                for event in events {
                    outcomes.push(processor.handle_status(event).await);
                }
                Task::Statuses(outcomes)
            });
        }

        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Task::Message(outcome)) => {
                    report.messages += 1;
                    match outcome {
                        MessageOutcome::Received => {}
                        MessageOutcome::AutoReplied { .. } => report.auto_replies += 1,
                        MessageOutcome::ReplyFailed { .. } => report.reply_failures += 1,
                    }
                }
                Ok(Task::Statuses(outcomes)) => {
                    for outcome in outcomes {
                        match outcome {
                            StatusOutcome::Broadcast => report.statuses_broadcast += 1,
                            StatusOutcome::Stale | StatusOutcome::Unknown => {
                                report.statuses_ignored += 1
                            }
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Batch task failed");
                    report.task_failures += 1;
                }
            }
        }

        debug!(?report, "Webhook batch complete");
        report
    }

    /// mark-read → `message_received` → match → dispatch → `auto_response_sent`.
    pub async fn handle_message(&self, message: InboundMessage) -> MessageOutcome {
        info!(message_id = %message.id, from = %message.from, kind = ?message.kind, "Inbound message");

        if !self.gateway.mark_read(&message.id).await {
            warn!(message_id = %message.id, "Mark-read failed, continuing");
        }

        self.broadcaster
            .emit_to_all(RealtimeEvent::MessageReceived(message.clone()))
            .await;

        if let Some(store) = &self.store {
            if let Err(e) = store.record_inbound(&message).await {
                warn!(message_id = %message.id, error = %e, "Failed to store inbound message");
            }
        }

        let rules = self.rules().await;
        let Some(hit) = match_response(message.matchable_text(), &rules) else {
            return MessageOutcome::Received;
        };

        match self.gateway.send_text(&message.from, hit.response).await {
            Ok(dispatch) => {
                info!(
                    in_reply_to = %message.id,
                    message_id = %dispatch.provider_message_id,
                    trigger = hit.trigger,
                    "Auto-response sent"
                );
                self.tracker.record(&dispatch).await;
                self.store_outbound(&dispatch, "text", Some(hit.response)).await;

                self.broadcaster
                    .emit_to_all(RealtimeEvent::AutoResponseSent(AutoResponse {
                        to: dispatch.destination.clone(),
                        message: hit.response.to_string(),
                        trigger: hit.trigger.to_string(),
                        provider_message_id: dispatch.provider_message_id.clone(),
                        in_reply_to: message.id.clone(),
                        timestamp: dispatch.sent_at,
                    }))
                    .await;

                MessageOutcome::AutoReplied {
                    provider_message_id: dispatch.provider_message_id,
                }
            }
            Err(e) => {
                error!(message_id = %message.id, error = %e, "Auto-response dispatch failed");
                MessageOutcome::ReplyFailed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Advance the tracked lifecycle and broadcast if it moved.
    pub async fn handle_status(&self, event: StatusEvent) -> StatusOutcome {
        let lifecycle = match self.tracker.apply(&event).await {
            ApplyOutcome::Advanced(lifecycle) => lifecycle,
            ApplyOutcome::Stale { .. } => return StatusOutcome::Stale,
            ApplyOutcome::Unknown => return StatusOutcome::Unknown,
        };

        info!(message_id = %event.id, status = %event.status, "Delivery status advanced");

        if let Some(store) = &self.store {
            if let Err(e) = store.apply_status(&event).await {
                warn!(message_id = %event.id, error = %e, "Failed to store status event");
            }
        }

        let update = StatusUpdate {
            message_id: event.id,
            status: event.status,
            timestamp: event.timestamp,
            recipient_id: event.recipient_id,
            errors: event.errors,
        };
        self.emit_status(lifecycle.viewer_id.as_deref(), update).await;
        StatusOutcome::Broadcast
    }

    // ── Direct operations ───────────────────────────────────────────

    /// Send a caller-initiated text or image message.
    ///
    /// On success the message is tracked and a local `sent` status is
    /// emitted, to `viewer_id` when given, otherwise to everyone.
    pub async fn send(
        &self,
        message: &OutboundMessage,
        viewer_id: Option<&str>,
    ) -> Result<DispatchResult, GatewayError> {
        let dispatch = match message {
            OutboundMessage::Text { destination, body } => {
                self.gateway.send_text(destination, body).await?
            }
            OutboundMessage::Image {
                destination,
                media_url,
                caption,
            } => {
                self.gateway
                    .send_media(destination, media_url, caption.as_deref())
                    .await?
            }
        };
        self.after_dispatch(&dispatch, message.kind(), message.body(), viewer_id)
            .await;
        Ok(dispatch)
    }

    pub async fn send_template(
        &self,
        destination: &str,
        template: &TemplateMessage,
        viewer_id: Option<&str>,
    ) -> Result<DispatchResult, GatewayError> {
        let dispatch = self.gateway.send_template(destination, template).await?;
        self.after_dispatch(&dispatch, "template", Some(&template.name), viewer_id)
            .await;
        Ok(dispatch)
    }

    pub async fn mark_read(&self, provider_message_id: &str) -> bool {
        self.gateway.mark_read(provider_message_id).await
    }

    /// Local lifecycle if tracked, otherwise ask the provider.
    pub async fn message_status(&self, provider_message_id: &str) -> Result<StatusLookup, GatewayError> {
        if let Some(lifecycle) = self.tracker.current(provider_message_id).await {
            return Ok(StatusLookup::Tracked { lifecycle });
        }
        debug!(message_id = provider_message_id, "Status not tracked, querying provider");
        let status = self.gateway.get_status(provider_message_id).await?;
        Ok(StatusLookup::Provider { status })
    }

    /// Snapshot of the active rule table.
    pub async fn rules(&self) -> Arc<RuleTable> {
        Arc::clone(&*self.rules.read().await)
    }

    /// Validate, persist and swap in a new rule table.
    ///
    /// When a store is attached and the write fails, the active table is
    /// left unchanged.
    pub async fn replace_rules(
        &self,
        rules: Vec<AutoResponseRule>,
    ) -> Result<Arc<RuleTable>, RulesError> {
        let table = Arc::new(RuleTable::validated(rules)?);

        let mut active = self.rules.write().await;
        if let Some(store) = &self.store {
            if let Err(e) = store.replace_rules(table.rules()).await {
                error!(error = %e, "Failed to persist rule table");
                return Err(e.into());
            }
        }
        *active = Arc::clone(&table);
        drop(active);

        info!(count = table.len(), "Rule table replaced");
        Ok(table)
    }

    // ── Helpers ─────────────────────────────────────────────────────

    async fn after_dispatch(
        &self,
        dispatch: &DispatchResult,
        kind: &str,
        body: Option<&str>,
        viewer_id: Option<&str>,
    ) {
        info!(
            message_id = %dispatch.provider_message_id,
            to = %dispatch.destination,
            kind,
            "Outbound message sent"
        );
        self.tracker.record_for(dispatch, viewer_id).await;
        self.store_outbound(dispatch, kind, body).await;

        let update = StatusUpdate {
            message_id: dispatch.provider_message_id.clone(),
            status: DeliveryStatus::Sent,
            timestamp: Utc::now(),
            recipient_id: dispatch.destination.clone(),
            errors: Vec::new(),
        };
        self.emit_status(viewer_id, update).await;
    }

    async fn store_outbound(&self, dispatch: &DispatchResult, kind: &str, body: Option<&str>) {
        if let Some(store) = &self.store {
            if let Err(e) = store.record_outbound(dispatch, kind, body).await {
                warn!(message_id = %dispatch.provider_message_id, error = %e, "Failed to store outbound message");
            }
        }
    }

    async fn emit_status(&self, viewer_id: Option<&str>, update: StatusUpdate) {
        let event = RealtimeEvent::MessageStatus(update);
        match viewer_id {
            Some(viewer) => {
                self.broadcaster.emit_to_viewer(viewer, event).await;
            }
            None => {
                self.broadcaster.emit_to_all(event).await;
            }
        }
    }
}
