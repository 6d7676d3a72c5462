//! Common types used across Beacon

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Transport connection ID wrapper
///
/// Also sent to clients as the per-connection correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ConnectionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Authenticated end-user key, `"<namespace>:<subject>"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Build the namespaced identity for a verified subject.
    pub fn from_subject(namespace: &str, subject: &str) -> Self {
        Self(format!("{namespace}:{subject}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Offline Buffer Records
// =============================================================================

/// One event held in the durable store for an offline (identity, topic).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferedEvent {
    pub identity: Identity,
    pub topic: String,
    /// The fully formed client message (`{type, timestamp, payload}`).
    pub payload: Value,
    /// Unix time in milliseconds.
    pub enqueued_at: i64,
}

impl BufferedEvent {
    pub fn new(identity: Identity, topic: impl Into<String>, payload: Value) -> Self {
        Self {
            identity,
            topic: topic.into(),
            payload,
            enqueued_at: now_millis(),
        }
    }

    /// Age relative to `now_ms`, clamped at zero for clock skew.
    pub fn age_millis(&self, now_ms: i64) -> i64 {
        (now_ms - self.enqueued_at).max(0)
    }
}

/// Current Unix time in milliseconds.
pub fn now_millis() -> i64 {
    let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
    i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identity_from_subject() {
        let identity = Identity::from_subject("apple", "u1");
        assert_eq!(identity.as_str(), "apple:u1");
        assert_eq!(identity.to_string(), "apple:u1");
    }

    #[test]
    fn test_buffered_event_wire_format() {
        let event = BufferedEvent {
            identity: Identity::from("apple:u1"),
            topic: "conversation:42".to_string(),
            payload: json!({"type": "status"}),
            enqueued_at: 1_700_000_000_000,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["identity"], "apple:u1");
        assert_eq!(value["enqueuedAt"], 1_700_000_000_000_i64);
        assert_eq!(value["payload"]["type"], "status");
    }

    #[test]
    fn test_age_is_never_negative() {
        let event = BufferedEvent {
            identity: Identity::from("apple:u1"),
            topic: "t".to_string(),
            payload: json!(null),
            enqueued_at: 5_000,
        };
        assert_eq!(event.age_millis(7_500), 2_500);
        assert_eq!(event.age_millis(1_000), 0);
    }

    #[test]
    fn test_connection_ids_are_unique() {
        assert_ne!(ConnectionId::new(), ConnectionId::new());
    }
}
