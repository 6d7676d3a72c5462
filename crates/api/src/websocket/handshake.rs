//! Out-of-band authentication handshake
//!
//! A freshly admitted connection must present an `auth` envelope before the
//! deadline. Anything else closes it.

use std::sync::Arc;
use std::time::Duration;

use beacon_shared::{CredentialVerifier, Identity, VerifyError};
use tokio::task::JoinHandle;

use super::connection::{AuthState, Connection};
use super::events::{close_code, ClientMessage, ServerMessage};
use super::registry::ConnectionRegistry;

/// How a handshake attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// Promoted and acknowledged
    Authenticated(Identity),
    /// Closed with 4002
    InvalidMessage,
    /// Closed with 4001
    Rejected,
    /// The connection went away while the credential was being verified
    Abandoned,
}

/// Spawn the authentication deadline for a connection.
///
/// The task ends early when the connection authenticates or closes.
pub fn arm_auth_timeout(
    registry: Arc<ConnectionRegistry>,
    conn: Arc<Connection>,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = conn.auth_timer().cancelled() => {}
            () = tokio::time::sleep(timeout) => {
                if conn.state() == AuthState::Unauthenticated
                    && conn.close(close_code::AUTH_TIMEOUT, "Authentication timeout")
                {
                    tracing::warn!(
                        connection_id = %conn.id,
                        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "WebSocket authentication timed out"
                    );
                    registry.deregister(&conn.id).await;
                }
            }
        }
    })
}

/// Verifies the first frame of a connection and promotes it
pub struct Handshake {
    registry: Arc<ConnectionRegistry>,
    verifier: Arc<dyn CredentialVerifier>,
    namespace: String,
}

impl Handshake {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        verifier: Arc<dyn CredentialVerifier>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            verifier,
            namespace: namespace.into(),
        }
    }

    /// Handle the first text frame of an unauthenticated connection
    pub async fn authenticate(&self, conn: &Arc<Connection>, text: &str) -> HandshakeOutcome {
        let token = match ClientMessage::parse(text) {
            Ok(ClientMessage::Auth { token }) => token,
            Ok(_) | Err(_) => return self.reject_invalid(conn).await,
        };

        conn.cancel_auth_timer();

        let result = self.verifier.verify(&token).await;

        // The client may have disconnected while the verifier was running
        if !conn.is_open() {
            tracing::debug!(connection_id = %conn.id, "Connection closed during authentication");
            return HandshakeOutcome::Abandoned;
        }

        match result {
            Ok(verified) => {
                let identity = Identity::from_subject(&self.namespace, &verified.subject);
                if !self.registry.promote(&conn.id, identity.clone()).await {
                    return HandshakeOutcome::Abandoned;
                }

                let _ = conn.send_json(&ServerMessage::AuthSuccess {
                    user_id: identity.clone(),
                });
                let _ = conn.send_json(&ServerMessage::connected(conn.id));

                HandshakeOutcome::Authenticated(identity)
            }
            Err(e) => {
                match &e {
                    VerifyError::Rejected(reason) => tracing::warn!(
                        connection_id = %conn.id,
                        reason = %reason,
                        "WebSocket auth failed: invalid token"
                    ),
                    VerifyError::Unavailable(reason) => tracing::error!(
                        connection_id = %conn.id,
                        error = %reason,
                        "WebSocket auth failed: verifier unavailable"
                    ),
                }
                conn.close(close_code::AUTH_FAILED, "Authentication failed");
                self.registry.deregister(&conn.id).await;
                HandshakeOutcome::Rejected
            }
        }
    }

    /// Close a connection that sent something other than a valid `auth`
    pub async fn reject_invalid(&self, conn: &Arc<Connection>) -> HandshakeOutcome {
        tracing::warn!(connection_id = %conn.id, "Expected auth message, closing connection");
        conn.close(close_code::INVALID_MESSAGE, "Invalid message: expected auth");
        self.registry.deregister(&conn.id).await;
        HandshakeOutcome::InvalidMessage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::Outbound;
    use async_trait::async_trait;
    use beacon_shared::VerifiedSubject;
    use serde_json::Value;
    use tokio::sync::mpsc;

    struct StaticVerifier;

    #[async_trait]
    impl CredentialVerifier for StaticVerifier {
        async fn verify(&self, token: &str) -> Result<VerifiedSubject, VerifyError> {
            match token {
                "tok-A" => Ok(VerifiedSubject::new("u1")),
                "tok-down" => Err(VerifyError::Unavailable("connection refused".into())),
                _ => Err(VerifyError::Rejected("unknown token".into())),
            }
        }
    }

    fn setup() -> (Arc<ConnectionRegistry>, Handshake) {
        let registry = Arc::new(ConnectionRegistry::new());
        let handshake = Handshake::new(Arc::clone(&registry), Arc::new(StaticVerifier), "apple");
        (registry, handshake)
    }

    async fn admit(
        registry: &ConnectionRegistry,
    ) -> (Arc<Connection>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (registry.register(Connection::new(tx)).await, rx)
    }

    fn next_json(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Value {
        match rx.try_recv().unwrap() {
            Outbound::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_successful_auth() {
        let (registry, handshake) = setup();
        let (conn, mut rx) = admit(&registry).await;

        let outcome = handshake
            .authenticate(&conn, r#"{"type":"auth","token":"tok-A"}"#)
            .await;

        assert_eq!(outcome, HandshakeOutcome::Authenticated(Identity::from("apple:u1")));
        assert!(conn.is_authenticated());

        let success = next_json(&mut rx);
        assert_eq!(success["type"], "auth_success");
        assert_eq!(success["userId"], "apple:u1");

        let connected = next_json(&mut rx);
        assert_eq!(connected["type"], "connected");
        assert_eq!(connected["connectionId"], conn.id.to_string());

        assert_eq!(registry.connections_for(&Identity::from("apple:u1")).await.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_token_closes_with_4001() {
        let (registry, handshake) = setup();
        let (conn, mut rx) = admit(&registry).await;

        let outcome = handshake
            .authenticate(&conn, r#"{"type":"auth","token":"bad"}"#)
            .await;

        assert_eq!(outcome, HandshakeOutcome::Rejected);
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Close {
                code: close_code::AUTH_FAILED,
                reason: "Authentication failed".to_string(),
            }
        );
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_unavailable_verifier_closes_with_4001() {
        let (registry, handshake) = setup();
        let (conn, _rx) = admit(&registry).await;

        let outcome = handshake
            .authenticate(&conn, r#"{"type":"auth","token":"tok-down"}"#)
            .await;
        assert_eq!(outcome, HandshakeOutcome::Rejected);
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn test_non_auth_first_message_closes_with_4002() {
        let (registry, handshake) = setup();
        for frame in [
            r#"{"type":"subscribe","topic":"t"}"#,
            r#"{"type":"ping"}"#,
            r#"{"type":"auth"}"#,
            r#"{"type":"auth","token":""}"#,
            r#"{"type":"bogus"}"#,
            "not json",
        ] {
            let (conn, mut rx) = admit(&registry).await;
            let outcome = handshake.authenticate(&conn, frame).await;

            assert_eq!(outcome, HandshakeOutcome::InvalidMessage, "frame: {frame}");
            assert_eq!(
                rx.try_recv().unwrap(),
                Outbound::Close {
                    code: close_code::INVALID_MESSAGE,
                    reason: "Invalid message: expected auth".to_string(),
                }
            );
        }
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_closed_during_verification_is_abandoned() {
        let (registry, handshake) = setup();
        let (conn, rx) = admit(&registry).await;
        drop(rx);

        let outcome = handshake
            .authenticate(&conn, r#"{"type":"auth","token":"tok-A"}"#)
            .await;
        assert_eq!(outcome, HandshakeOutcome::Abandoned);
        assert!(!conn.is_authenticated());
    }

    #[tokio::test]
    async fn test_auth_timeout_fires() {
        let (registry, _handshake) = setup();
        let (conn, mut rx) = admit(&registry).await;

        arm_auth_timeout(Arc::clone(&registry), Arc::clone(&conn), Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Close {
                code: close_code::AUTH_TIMEOUT,
                reason: "Authentication timeout".to_string(),
            }
        );
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_auth_timeout_cancelled_by_auth() {
        let (registry, handshake) = setup();
        let (conn, mut rx) = admit(&registry).await;
        let timer = arm_auth_timeout(
            Arc::clone(&registry),
            Arc::clone(&conn),
            Duration::from_millis(50),
        );

        handshake
            .authenticate(&conn, r#"{"type":"auth","token":"tok-A"}"#)
            .await;
        timer.await.unwrap();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(conn.is_authenticated());
        while let Ok(frame) = rx.try_recv() {
            assert!(!matches!(frame, Outbound::Close { .. }));
        }
    }

    #[tokio::test]
    async fn test_auth_timeout_cancelled_by_deregister() {
        let (registry, _handshake) = setup();
        let (conn, mut rx) = admit(&registry).await;
        let timer = arm_auth_timeout(
            Arc::clone(&registry),
            Arc::clone(&conn),
            Duration::from_secs(60),
        );

        registry.deregister(&conn.id).await;
        timer.await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
