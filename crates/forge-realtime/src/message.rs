//! Phoenix channel frames.
//!
//! Realtime uses the Phoenix v1 JSON serializer: every frame is an object
//! with `topic`, `event`, `payload` and `ref`. Row changes arrive as
//! `postgres_changes` events whose `payload.data.record` is the new row.

use forge_core::Trade;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::RealtimeResult;

pub const PHOENIX_TOPIC: &str = "phoenix";

pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_LEAVE: &str = "phx_leave";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_POSTGRES_CHANGES: &str = "postgres_changes";
pub const EVENT_SYSTEM: &str = "system";

// ============================================================================
// Frame
// ============================================================================

/// One Phoenix frame, either direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

impl PhoenixMessage {
    /// Heartbeat on the `phoenix` topic. The server replies on the same ref.
    pub fn heartbeat(msg_ref: u64) -> Self {
        Self {
            topic: PHOENIX_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }

    /// Join `topic` listening for every change on `schema.table`.
    ///
    /// `filter` is a Realtime row filter such as `status=eq.active`.
    pub fn join(
        topic: &str,
        msg_ref: u64,
        schema: &str,
        table: &str,
        filter: Option<&str>,
        access_token: &str,
    ) -> Self {
        let mut change = json!({
            "event": "*",
            "schema": schema,
            "table": table,
        });
        if let Some(filter) = filter {
            change["filter"] = Value::String(filter.to_string());
        }

        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload: json!({
                "config": {
                    "broadcast": { "self": false },
                    "presence": { "key": "" },
                    "postgres_changes": [change],
                },
                "access_token": access_token,
            }),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: Some(msg_ref.to_string()),
        }
    }

    pub fn leave(topic: &str, msg_ref: u64) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_LEAVE.to_string(),
            payload: json!({}),
            msg_ref: Some(msg_ref.to_string()),
            join_ref: None,
        }
    }

    /// `payload.status` of a `phx_reply`.
    pub fn reply_status(&self) -> Option<&str> {
        if self.event != EVENT_REPLY {
            return None;
        }
        self.payload.get("status").and_then(Value::as_str)
    }

    pub fn is_heartbeat_reply(&self) -> bool {
        self.topic == PHOENIX_TOPIC && self.event == EVENT_REPLY
    }

    pub fn is_ref(&self, msg_ref: u64) -> bool {
        self.msg_ref
            .as_deref()
            .is_some_and(|r| r == msg_ref.to_string())
    }

    /// Decode the change carried by a `postgres_changes` event.
    pub fn as_postgres_change(&self) -> Option<RealtimeResult<PostgresChange>> {
        if self.event != EVENT_POSTGRES_CHANGES {
            return None;
        }
        let data = self.payload.get("data")?;
        Some(serde_json::from_value(data.clone()).map_err(Into::into))
    }
}

// ============================================================================
// Postgres changes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// `payload.data` of a `postgres_changes` event.
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresChange {
    pub schema: String,
    pub table: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    #[serde(default)]
    pub commit_timestamp: Option<String>,
    #[serde(default)]
    pub record: Option<Value>,
    #[serde(default)]
    pub old_record: Option<Value>,
}

impl PostgresChange {
    /// The new trade row. `None` for deletes.
    pub fn trade(&self) -> RealtimeResult<Option<Trade>> {
        match (self.change_type, &self.record) {
            (ChangeType::Delete, _) | (_, None) => Ok(None),
            (_, Some(record)) => Ok(Some(serde_json::from_value(record.clone())?)),
        }
    }
}
