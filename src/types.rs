//! Type definitions for the gateway client.
//!
//! Request and response bodies are plain [`serde_json::Value`]s; only the
//! shapes the client itself reasons about are typed here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Intent statuses after which no further events are produced.
pub const TERMINAL_STATUSES: [&str; 3] = ["COMPLETED", "FAILED", "CANCELED"];

/// Intent event types after which no further events are produced.
pub const TERMINAL_EVENT_TYPES: [&str; 3] =
    ["intent.completed", "intent.failed", "intent.canceled"];

// === Intent events ===

/// One lifecycle event of an intent, as produced by the gateway.
///
/// The full JSON object is preserved; accessors read the fields the
/// observation engine relies on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntentEvent(Map<String, Value>);

impl IntentEvent {
    /// Wrap a JSON object.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Wrap a JSON value, if it is an object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    /// Sequence number, when present and a non-negative integer.
    pub fn seq(&self) -> Option<u64> {
        self.0.get("seq").and_then(Value::as_u64)
    }

    /// The `status` field.
    pub fn status(&self) -> Option<&str> {
        self.0.get("status").and_then(Value::as_str)
    }

    /// The `event_type` field.
    pub fn event_type(&self) -> Option<&str> {
        self.0.get("event_type").and_then(Value::as_str)
    }

    /// Whether no further events will follow this one.
    pub fn is_terminal(&self) -> bool {
        self.status()
            .is_some_and(|status| TERMINAL_STATUSES.contains(&status))
            || self
                .event_type()
                .is_some_and(|event_type| TERMINAL_EVENT_TYPES.contains(&event_type))
    }

    /// Look up any field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Borrow the underlying object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Unwrap into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

// === Queries ===

/// Pagination and filtering for list-style reads.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Owner identity; falls back to the client's default owner.
    pub owner_agent: Option<String>,
    /// Opaque pagination cursor.
    pub cursor: Option<String>,
    /// Page size.
    pub limit: Option<u32>,
    /// Lower bound (sequence number or timestamp, endpoint dependent).
    pub since: Option<String>,
}

impl ListQuery {
    /// Query parameters for the fields that are present.
    pub(crate) fn to_params(&self, default_owner: Option<&str>) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = Vec::new();
        if let Some(owner) = self.owner_agent.as_deref().or(default_owner) {
            params.push(("owner_agent".to_string(), owner.to_string()));
        }
        if let Some(ref cursor) = self.cursor {
            params.push(("cursor".to_string(), cursor.clone()));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(ref since) = self.since {
            params.push(("since".to_string(), since.clone()));
        }
        params
    }
}

// === Operation options ===

/// Options for creating an intent.
#[derive(Debug, Clone, Default)]
pub struct CreateIntentOptions {
    /// Correlation id; must agree with `correlation_id` in the payload if
    /// both are given.
    pub correlation_id: Option<String>,
    /// Makes the create safe to retry.
    pub idempotency_key: Option<String>,
    /// Trace id pinned for every attempt.
    pub trace_id: Option<String>,
}

/// Decision recorded on an approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    /// Let the gated action proceed.
    Approve,
    /// Block the gated action.
    Reject,
}
