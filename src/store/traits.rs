//! `MessageStore` trait: the narrow persistence interface the relay uses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::gateway::DispatchResult;
use crate::pipeline::rules::AutoResponseRule;
use crate::pipeline::types::{InboundMessage, StatusEvent};

/// Which way a stored message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inbound" => Some(Self::Inbound),
            "outbound" => Some(Self::Outbound),
            _ => None,
        }
    }
}

/// A persisted message row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    /// Provider message id.
    pub id: String,
    pub direction: Direction,
    /// Sender for inbound messages, destination for outbound ones.
    pub peer: String,
    pub kind: String,
    pub body: Option<String>,
    /// `received` for inbound; the latest delivery stage for outbound.
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Backend-agnostic store for rules and message history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// Load the persisted rule table in order. Empty when none was saved.
    async fn load_rules(&self) -> Result<Vec<AutoResponseRule>, DatabaseError>;

    /// Atomically replace the persisted rule table.
    async fn replace_rules(&self, rules: &[AutoResponseRule]) -> Result<(), DatabaseError>;

    /// Persist an inbound message. Redelivered ids are ignored.
    async fn record_inbound(&self, message: &InboundMessage) -> Result<(), DatabaseError>;

    /// Persist an accepted outbound send.
    async fn record_outbound(
        &self,
        dispatch: &DispatchResult,
        kind: &str,
        body: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Append a status event to history and update the message's status.
    async fn apply_status(&self, event: &StatusEvent) -> Result<(), DatabaseError>;

    /// Look up a message by provider id.
    async fn get_message(&self, id: &str) -> Result<Option<StoredMessage>, DatabaseError>;
}
