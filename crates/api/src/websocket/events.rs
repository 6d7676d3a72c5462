//! WebSocket message types and serialization
//!
//! Defines the client-to-server envelopes, the server-to-client
//! acknowledgments, the application event envelope, and the close codes used
//! by the handshake.

use beacon_shared::{ConnectionId, Identity};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

// =============================================================================
// Close Codes
// =============================================================================

/// Transport close codes sent by the server
pub mod close_code {
    /// Normal closure
    pub const NORMAL: u16 = 1000;
    /// Server shutting down
    pub const GOING_AWAY: u16 = 1001;
    /// Credential rejected by the verifier
    pub const AUTH_FAILED: u16 = 4001;
    /// Anything other than a valid `auth` envelope while awaiting a credential
    pub const INVALID_MESSAGE: u16 = 4002;
    /// No credential arrived before the authentication deadline
    pub const AUTH_TIMEOUT: u16 = 4008;
}

// =============================================================================
// Client-to-Server Messages
// =============================================================================

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Present a credential (only valid before authentication)
    Auth { token: String },

    /// Subscribe to a topic
    Subscribe { topic: String },

    /// Unsubscribe from a topic
    Unsubscribe { topic: String },

    /// Application-level keepalive
    Ping,
}

const KNOWN_TYPES: &[&str] = &["auth", "subscribe", "unsubscribe", "ping"];

/// Why an inbound frame could not be turned into a [`ClientMessage`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid message format")]
    Malformed,
    #[error("Unknown message type: {0}")]
    UnknownType(String),
}

impl ClientMessage {
    /// Parse a text frame, separating unknown `type` values from malformed envelopes
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let value: Value = serde_json::from_str(text).map_err(|_| ParseError::Malformed)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ParseError::Malformed)?;

        if !KNOWN_TYPES.contains(&kind) {
            return Err(ParseError::UnknownType(kind.to_string()));
        }

        let message: ClientMessage =
            serde_json::from_value(value).map_err(|_| ParseError::Malformed)?;

        // Empty identifiers are never meaningful
        match &message {
            ClientMessage::Auth { token } if token.trim().is_empty() => Err(ParseError::Malformed),
            ClientMessage::Subscribe { topic } | ClientMessage::Unsubscribe { topic }
                if topic.trim().is_empty() =>
            {
                Err(ParseError::Malformed)
            }
            _ => Ok(message),
        }
    }
}

// =============================================================================
// Server-to-Client Messages
// =============================================================================

/// Acknowledgments and control messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Credential accepted
    AuthSuccess { user_id: Identity },

    /// Welcome message following `auth_success`
    Connected {
        message: String,
        #[serde(with = "time::serde::rfc3339")]
        server_time: OffsetDateTime,
        connection_id: ConnectionId,
    },

    /// Subscription added
    SubscriptionConfirmed {
        topic: String,
        active_subscriptions: Vec<String>,
        buffered_message_count: usize,
    },

    /// Subscription removed
    UnsubscriptionConfirmed {
        topic: String,
        active_subscriptions: Vec<String>,
    },

    /// Reply to a client `ping`
    Pong {
        #[serde(with = "time::serde::rfc3339")]
        server_time: OffsetDateTime,
    },

    /// Error message
    Error { message: String },
}

impl ServerMessage {
    pub fn connected(connection_id: ConnectionId) -> Self {
        ServerMessage::Connected {
            message: "Connected to notification service".to_string(),
            server_time: OffsetDateTime::now_utc(),
            connection_id,
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong {
            server_time: OffsetDateTime::now_utc(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

// =============================================================================
// Application Events
// =============================================================================

/// An application event handed to the hub by a producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl OutboundEvent {
    pub fn new(event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            event_type: event_type.into(),
            payload,
        }
    }

    /// Stamp the event for delivery
    pub fn envelope(&self) -> EventEnvelope {
        EventEnvelope {
            event_type: self.event_type.clone(),
            timestamp: OffsetDateTime::now_utc(),
            payload: self.payload.clone(),
        }
    }
}

/// Wire form of an application event: `{type, timestamp, payload}`
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_client_message_parsing() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"auth","token":"tok-A"}"#),
            Ok(ClientMessage::Auth {
                token: "tok-A".to_string(),
            })
        );
        assert_eq!(
            ClientMessage::parse(r#"{"type":"subscribe","topic":"conversation:42"}"#),
            Ok(ClientMessage::Subscribe {
                topic: "conversation:42".to_string(),
            })
        );
        assert_eq!(ClientMessage::parse(r#"{"type":"ping"}"#), Ok(ClientMessage::Ping));
    }

    #[test]
    fn test_unknown_type_is_distinguished() {
        assert_eq!(
            ClientMessage::parse(r#"{"type":"typing_start"}"#),
            Err(ParseError::UnknownType("typing_start".to_string()))
        );
    }

    #[test]
    fn test_malformed_envelopes() {
        for text in [
            "not json",
            r#"{"token":"tok-A"}"#,
            r#"{"type":42}"#,
            r#"{"type":"auth"}"#,
            r#"{"type":"auth","token":""}"#,
            r#"{"type":"auth","token":7}"#,
            r#"{"type":"subscribe","topic":"  "}"#,
        ] {
            assert_eq!(ClientMessage::parse(text), Err(ParseError::Malformed), "{text}");
        }
    }

    #[test]
    fn test_auth_success_serialization() {
        let msg = ServerMessage::AuthSuccess {
            user_id: Identity::from("apple:u1"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"auth_success","userId":"apple:u1"}"#);
    }

    #[test]
    fn test_subscription_confirmed_serialization() {
        let msg = ServerMessage::SubscriptionConfirmed {
            topic: "conversation:42".to_string(),
            active_subscriptions: vec!["conversation:42".to_string()],
            buffered_message_count: 3,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "subscription_confirmed");
        assert_eq!(value["activeSubscriptions"], json!(["conversation:42"]));
        assert_eq!(value["bufferedMessageCount"], 3);
    }

    #[test]
    fn test_connected_serialization() {
        let id = ConnectionId::from(Uuid::nil());
        let value = serde_json::to_value(ServerMessage::connected(id)).unwrap();
        assert_eq!(value["type"], "connected");
        assert_eq!(value["connectionId"], "00000000-0000-0000-0000-000000000000");
        assert!(value["serverTime"].is_string());
        assert!(value["message"].is_string());
    }

    #[test]
    fn test_error_serialization() {
        let json = serde_json::to_string(&ServerMessage::error("Test error")).unwrap();
        assert_eq!(json, r#"{"type":"error","message":"Test error"}"#);
    }

    #[test]
    fn test_event_envelope_shape() {
        let event: OutboundEvent =
            serde_json::from_value(json!({"type": "status", "payload": {"status": "completed"}}))
                .unwrap();
        let value = serde_json::to_value(event.envelope()).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["payload"]["status"], "completed");
        assert!(value["timestamp"].is_string());
    }
}
