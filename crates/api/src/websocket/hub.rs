//! Notification hub
//!
//! Owns the registry, handshake, fan-out, and heartbeat for one server
//! instance. Transports hand inbound frames to the hub; producers publish
//! through it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use beacon_shared::{CredentialVerifier, DurableStore, Identity};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connection::{AuthState, Connection, Outbound};
use super::events::{close_code, ClientMessage, OutboundEvent, ParseError, ServerMessage};
use super::fanout::{FanOut, PublishOutcome};
use super::handshake::{arm_auth_timeout, Handshake};
use super::liveness;
use super::registry::{ConnectionRegistry, RegistryStats};
use crate::buffer::{BufferConfig, OfflineBuffer};

/// Settings for the notification subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Deadline for the first `auth` message
    pub auth_timeout: Duration,
    /// Period between liveness sweeps
    pub heartbeat_interval: Duration,
    /// Prefix for identities built from verified subjects
    pub identity_namespace: String,
    pub buffer: BufferConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            identity_namespace: "apple".to_string(),
            buffer: BufferConfig::default(),
        }
    }
}

/// Real-time notification hub
pub struct NotificationHub {
    config: HubConfig,
    registry: Arc<ConnectionRegistry>,
    buffer: Arc<OfflineBuffer>,
    handshake: Handshake,
    fanout: FanOut,
    shutdown: CancellationToken,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationHub {
    pub fn new(
        config: HubConfig,
        verifier: Arc<dyn CredentialVerifier>,
        store: Arc<dyn DurableStore>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let buffer = Arc::new(OfflineBuffer::new(store, config.buffer.clone()));
        let handshake = Handshake::new(
            Arc::clone(&registry),
            verifier,
            config.identity_namespace.clone(),
        );
        let fanout = FanOut::new(Arc::clone(&registry), Arc::clone(&buffer));

        Self {
            config,
            registry,
            buffer,
            handshake,
            fanout,
            shutdown: CancellationToken::new(),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn buffer(&self) -> &Arc<OfflineBuffer> {
        &self.buffer
    }

    /// Spawn the heartbeat loop. Calling it again while running is a no-op.
    pub fn start_heartbeat(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let Ok(mut slot) = self.heartbeat.lock() else {
            tracing::error!("Heartbeat handle lock poisoned");
            return;
        };
        if slot.is_some() {
            return;
        }

        *slot = Some(tokio::spawn(liveness::run_heartbeat(
            Arc::clone(&self.registry),
            self.config.heartbeat_interval,
            self.shutdown.child_token(),
        )));
        tracing::info!(
            interval_secs = self.config.heartbeat_interval.as_secs(),
            "Heartbeat started"
        );
    }

    /// Whether new transports are admitted
    pub fn is_accepting(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    /// Admit a transport and arm its authentication deadline.
    ///
    /// Returns `None` once shutdown has begun, with a going-away close frame
    /// queued on `sender`.
    pub async fn register(
        &self,
        sender: mpsc::UnboundedSender<Outbound>,
    ) -> Option<Arc<Connection>> {
        if !self.is_accepting() {
            let _ = sender.send(Outbound::Close {
                code: close_code::GOING_AWAY,
                reason: "Server shutting down".to_string(),
            });
            return None;
        }

        let conn = self.registry.register(Connection::new(sender)).await;

        // Shutdown may have swept the registry while we were inserting
        if !self.is_accepting() {
            conn.close(close_code::GOING_AWAY, "Server shutting down");
            self.registry.deregister(&conn.id).await;
            return None;
        }

        arm_auth_timeout(
            Arc::clone(&self.registry),
            Arc::clone(&conn),
            self.config.auth_timeout,
        );
        Some(conn)
    }

    /// Handle an inbound text frame
    pub async fn handle_text(&self, conn: &Arc<Connection>, text: &str) {
        conn.mark_alive();

        match conn.state() {
            AuthState::Unauthenticated => {
                self.handshake.authenticate(conn, text).await;
            }
            AuthState::Authenticated => self.dispatch(conn, text).await,
            AuthState::Closed => {}
        }
    }

    /// Handle an inbound binary frame
    pub async fn handle_binary(&self, conn: &Arc<Connection>) {
        conn.mark_alive();

        match conn.state() {
            AuthState::Unauthenticated => {
                self.handshake.reject_invalid(conn).await;
            }
            AuthState::Authenticated => {
                tracing::warn!(
                    connection_id = %conn.id,
                    "Binary frame on authenticated connection"
                );
                let _ = conn.send_json(&ServerMessage::error("Binary messages are not supported"));
            }
            AuthState::Closed => {}
        }
    }

    /// Record a transport-level pong (or any other sign of life)
    pub fn handle_pong(&self, conn: &Connection) {
        conn.mark_alive();
    }

    /// The transport closed from the client side
    pub async fn disconnect(&self, conn: &Connection) {
        conn.release();
        self.registry.deregister(&conn.id).await;
    }

    async fn dispatch(&self, conn: &Arc<Connection>, text: &str) {
        match ClientMessage::parse(text) {
            Ok(ClientMessage::Subscribe { topic }) => {
                self.fanout.subscribe(conn, &topic).await;
            }
            Ok(ClientMessage::Unsubscribe { topic }) => {
                self.fanout.unsubscribe(conn, &topic).await;
            }
            Ok(ClientMessage::Ping) => {
                let _ = conn.send_json(&ServerMessage::pong());
            }
            Ok(ClientMessage::Auth { .. }) => {
                tracing::warn!(
                    connection_id = %conn.id,
                    "Repeated auth on authenticated connection"
                );
                let _ = conn.send_json(&ServerMessage::error("Already authenticated"));
            }
            Err(e) => {
                match &e {
                    ParseError::UnknownType(kind) => tracing::warn!(
                        connection_id = %conn.id,
                        message_type = %kind,
                        "Unknown client message type"
                    ),
                    ParseError::Malformed => tracing::warn!(
                        connection_id = %conn.id,
                        "Failed to parse client message"
                    ),
                }
                let _ = conn.send_json(&ServerMessage::error(e.to_string()));
            }
        }
    }

    /// Deliver an event to subscribed connections of `identity`, buffering if none take it
    pub async fn publish(
        &self,
        identity: &Identity,
        topic: &str,
        event: &OutboundEvent,
    ) -> PublishOutcome {
        self.fanout.publish(identity, topic, event).await
    }

    /// Deliver to every connection of `identity` regardless of topic
    pub async fn send_direct(&self, identity: &Identity, event: &OutboundEvent) -> usize {
        self.fanout.send_direct(identity, event).await
    }

    /// Deliver to every authenticated connection
    pub async fn broadcast(&self, event: &OutboundEvent) -> usize {
        self.fanout.broadcast(event).await
    }

    pub async fn stats(&self) -> RegistryStats {
        self.registry.stats().await
    }

    /// Stop the heartbeat, refuse new transports, and close everything. Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let heartbeat = self.heartbeat.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = heartbeat {
            let _ = handle.await;
        }

        let connections = self.registry.all().await;
        let total = connections.len();
        for conn in connections {
            conn.close(close_code::GOING_AWAY, "Server shutting down");
            self.registry.deregister(&conn.id).await;
        }

        tracing::info!(closed_connections = total, "Notification hub shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MemoryStore;
    use async_trait::async_trait;
    use beacon_shared::{VerifiedSubject, VerifyError};
    use serde_json::Value;

    struct StaticVerifier;

    #[async_trait]
    impl CredentialVerifier for StaticVerifier {
        async fn verify(&self, token: &str) -> Result<VerifiedSubject, VerifyError> {
            if token == "tok-A" {
                Ok(VerifiedSubject::new("u1"))
            } else {
                Err(VerifyError::Rejected("unknown token".into()))
            }
        }
    }

    fn hub() -> NotificationHub {
        NotificationHub::new(
            HubConfig::default(),
            Arc::new(StaticVerifier),
            Arc::new(MemoryStore::new()),
        )
    }

    async fn authed(hub: &NotificationHub) -> (Arc<Connection>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = hub.register(tx).await.unwrap();
        hub.handle_text(&conn, r#"{"type":"auth","token":"tok-A"}"#).await;
        while rx.try_recv().is_ok() {}
        (conn, rx)
    }

    fn next_json(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Value {
        match rx.try_recv().unwrap() {
            Outbound::Text(text) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn test_default_config() {
        let config = HubConfig::default();
        assert_eq!(config.auth_timeout, Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.identity_namespace, "apple");
        assert_eq!(config.buffer.max_messages, 100);
    }

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let hub = hub();
        let (conn, mut rx) = authed(&hub).await;

        hub.handle_text(&conn, r#"{"type":"ping"}"#).await;
        let pong = next_json(&mut rx);
        assert_eq!(pong["type"], "pong");
        assert!(pong["serverTime"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_and_malformed_get_error_replies() {
        let hub = hub();
        let (conn, mut rx) = authed(&hub).await;

        hub.handle_text(&conn, r#"{"type":"dance"}"#).await;
        assert_eq!(next_json(&mut rx)["message"], "Unknown message type: dance");

        hub.handle_text(&conn, "{oops").await;
        assert_eq!(next_json(&mut rx)["message"], "Invalid message format");

        hub.handle_text(&conn, r#"{"type":"auth","token":"tok-A"}"#).await;
        assert_eq!(next_json(&mut rx)["message"], "Already authenticated");

        hub.handle_binary(&conn).await;
        assert_eq!(next_json(&mut rx)["type"], "error");

        // Still connected
        assert!(conn.is_open());
        assert_eq!(hub.stats().await.authenticated_connections, 1);
    }

    #[tokio::test]
    async fn test_binary_before_auth_closes() {
        let hub = hub();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn = hub.register(tx).await.unwrap();

        hub.handle_binary(&conn).await;
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Close {
                code: close_code::INVALID_MESSAGE,
                reason: "Invalid message: expected auth".to_string(),
            }
        );
        assert_eq!(hub.stats().await.active_connections, 0);
    }

    #[tokio::test]
    async fn test_frames_mark_alive() {
        let hub = hub();
        let (conn, _rx) = authed(&hub).await;

        conn.check_alive();
        hub.handle_text(&conn, r#"{"type":"ping"}"#).await;
        assert!(conn.check_alive());

        hub.handle_pong(&conn);
        assert!(conn.check_alive());
    }

    #[tokio::test]
    async fn test_disconnect_deregisters() {
        let hub = hub();
        let (conn, _rx) = authed(&hub).await;

        hub.disconnect(&conn).await;
        assert!(!conn.is_open());
        assert_eq!(hub.stats().await, RegistryStats {
            active_connections: 0,
            authenticated_connections: 0,
            identities: 0,
        });
        // Second disconnect is harmless
        hub.disconnect(&conn).await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything_and_refuses_new() {
        let hub = hub();
        hub.start_heartbeat();
        let (_authed, mut authed_rx) = authed(&hub).await;
        let (tx, mut pending_rx) = mpsc::unbounded_channel();
        let pending = hub.register(tx).await.unwrap();

        hub.shutdown().await;

        let going_away = Outbound::Close {
            code: close_code::GOING_AWAY,
            reason: "Server shutting down".to_string(),
        };
        assert_eq!(authed_rx.try_recv().unwrap(), going_away);
        assert_eq!(pending_rx.try_recv().unwrap(), going_away);
        assert!(pending.auth_timer().is_cancelled());
        assert_eq!(hub.stats().await.active_connections, 0);
        assert!(!hub.is_accepting());

        let (tx, mut late_rx) = mpsc::unbounded_channel();
        assert!(hub.register(tx).await.is_none());
        assert_eq!(late_rx.try_recv().unwrap(), going_away);
        assert!(late_rx.try_recv().is_err());

        // Idempotent
        hub.shutdown().await;
    }
}
