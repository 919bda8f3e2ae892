//! libSQL backend for `MessageStore`.
//!
//! Supports local file and in-memory databases. A single connection is
//! reused for all operations, so writes are serialized behind `writes`:
//! a transaction open on the shared connection would otherwise absorb
//! unrelated statements.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::gateway::DispatchResult;
use crate::pipeline::rules::AutoResponseRule;
use crate::pipeline::types::{InboundMessage, MessageKind, StatusEvent};
use crate::store::migrations;
use crate::store::traits::{Direction, MessageStore, StoredMessage};

/// libSQL-backed message store.
pub struct LibSqlStore {
    _db: LibSqlDatabase,
    conn: Connection,
    writes: Mutex<()>,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let store = Self::from_database(db)?;
        store.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let store = Self::from_database(db)?;
        store.run_migrations().await?;
        Ok(store)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            _db: db,
            conn,
            writes: Mutex::new(()),
        })
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn kind_to_str(kind: MessageKind) -> String {
    serde_json::to_value(kind)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| "unsupported".into())
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn row_to_message(row: &libsql::Row) -> Result<StoredMessage, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));
    let direction: String = row.get(1).map_err(parse)?;
    let created: String = row.get(6).map_err(parse)?;
    let updated: String = row.get(7).map_err(parse)?;

    Ok(StoredMessage {
        id: row.get(0).map_err(parse)?,
        direction: Direction::parse(&direction).ok_or_else(|| {
            DatabaseError::Serialization(format!("unknown message direction '{direction}'"))
        })?,
        peer: row.get(2).map_err(parse)?,
        kind: row.get(3).map_err(parse)?,
        body: row.get(4).ok(),
        status: row.get(5).map_err(parse)?,
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

const MESSAGE_COLUMNS: &str = "id, direction, peer, kind, body, status, created_at, updated_at";

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl MessageStore for LibSqlStore {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&self.conn).await
    }

    // ── Rules ───────────────────────────────────────────────────────

    async fn load_rules(&self) -> Result<Vec<AutoResponseRule>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT triggers, response FROM auto_response_rules ORDER BY position ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("load_rules: {e}")))?;

        let mut rules = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("load_rules: {e}")))?
        {
            let triggers: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
            let response: String = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
            let triggers: Vec<String> = serde_json::from_str(&triggers)
                .map_err(|e| DatabaseError::Serialization(format!("rule triggers: {e}")))?;
            rules.push(AutoResponseRule { triggers, response });
        }
        Ok(rules)
    }

    async fn replace_rules(&self, rules: &[AutoResponseRule]) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let _guard = self.writes.lock().await;
        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_rules: {e}")))?;

        tx.execute("DELETE FROM auto_response_rules", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_rules: {e}")))?;

        for (position, rule) in rules.iter().enumerate() {
            let triggers = serde_json::to_string(&rule.triggers)
                .map_err(|e| DatabaseError::Serialization(format!("rule triggers: {e}")))?;
            tx.execute(
                "INSERT INTO auto_response_rules (position, triggers, response, updated_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![position as i64, triggers, rule.response.clone(), now.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_rules: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_rules commit: {e}")))?;
        debug!(count = rules.len(), "Rule table persisted");
        Ok(())
    }

    // ── Messages ────────────────────────────────────────────────────

    async fn record_inbound(&self, message: &InboundMessage) -> Result<(), DatabaseError> {
        let payload = serde_json::to_string(message)
            .map_err(|e| DatabaseError::Serialization(format!("inbound message: {e}")))?;
        let now = Utc::now().to_rfc3339();

        let _guard = self.writes.lock().await;
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO messages
                    (id, direction, peer, kind, body, status, payload, created_at, updated_at)
                 VALUES (?1, 'inbound', ?2, ?3, ?4, 'received', ?5, ?6, ?7)",
                params![
                    message.id.clone(),
                    message.from.clone(),
                    kind_to_str(message.kind),
                    opt_text(message.text_body.as_deref()),
                    payload,
                    message.timestamp.to_rfc3339(),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_inbound: {e}")))?;

        if inserted == 0 {
            debug!(message_id = %message.id, "Inbound message already stored");
        }
        Ok(())
    }

    async fn record_outbound(
        &self,
        dispatch: &DispatchResult,
        kind: &str,
        body: Option<&str>,
    ) -> Result<(), DatabaseError> {
        let sent_at = dispatch.sent_at.to_rfc3339();
        let _guard = self.writes.lock().await;
        self.conn
            .execute(
                "INSERT INTO messages
                    (id, direction, peer, kind, body, status, created_at, updated_at)
                 VALUES (?1, 'outbound', ?2, ?3, ?4, 'sent', ?5, ?5)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    dispatch.provider_message_id.clone(),
                    dispatch.destination.clone(),
                    kind,
                    opt_text(body),
                    sent_at,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_outbound: {e}")))?;
        Ok(())
    }

    async fn apply_status(&self, event: &StatusEvent) -> Result<(), DatabaseError> {
        let errors = if event.errors.is_empty() {
            None
        } else {
            Some(
                serde_json::to_string(&event.errors)
                    .map_err(|e| DatabaseError::Serialization(format!("status errors: {e}")))?,
            )
        };
        let occurred_at = event.timestamp.to_rfc3339();

        let _guard = self.writes.lock().await;
        self.conn
            .execute(
                "INSERT INTO message_statuses (message_id, status, recipient_id, errors, occurred_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    event.id.clone(),
                    event.status.as_str(),
                    event.recipient_id.clone(),
                    opt_text(errors.as_deref()),
                    occurred_at.clone(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("apply_status: {e}")))?;

        self.conn
            .execute(
                "UPDATE messages SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![event.status.as_str(), occurred_at, event.id.clone()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("apply_status: {e}")))?;
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<StoredMessage>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_message(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_message: {e}"))),
        }
    }
}
