use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source tag written on every audit event this engine emits.
pub const EVENT_SOURCE: &str = "rate-limit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Warning,
    Block,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Block => "block",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::Warning => Severity::Warning,
            Self::Block => Severity::Error,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// Caller-supplied identity details that may end up, masked, in an event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventContext {
    pub user_id: Option<String>,
    pub ip: Option<String>,
    pub email: Option<String>,
}

/// Audit record of a warning or block decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitEvent {
    pub id: Uuid,
    pub source: String,
    pub module: String,
    pub event_type: EventType,
    pub severity: Severity,
    /// User id when known.
    pub actor: Option<String>,
    /// Masked rate-limit key.
    pub subject: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
