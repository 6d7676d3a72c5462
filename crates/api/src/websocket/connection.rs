//! WebSocket connection management
//!
//! Represents one transport connection: its authentication state, bound
//! identity, topic subscriptions, liveness flag, and the outbound channel
//! drained by the socket writer task.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use beacon_shared::{ConnectionId, Identity};
use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Authentication state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AuthState {
    Unauthenticated = 0,
    Authenticated = 1,
    Closed = 2,
}

impl AuthState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => AuthState::Unauthenticated,
            1 => AuthState::Authenticated,
            _ => AuthState::Closed,
        }
    }
}

/// Frames queued for the socket writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized JSON text frame
    Text(Arc<str>),
    /// Transport-level liveness probe
    Ping,
    /// Close handshake with a status code, then stop writing
    Close { code: u16, reason: String },
    /// Drop the transport without a close handshake
    Terminate,
}

/// Outbound delivery failure
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Connection is closed")]
    Closed,
    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Represents an active WebSocket connection
#[derive(Debug)]
pub struct Connection {
    /// Unique ID for this connection (also the client-facing correlation id)
    pub id: ConnectionId,

    /// When the transport was admitted
    connected_at: Instant,

    state: AtomicU8,

    /// Authenticated identity, bound once by `promote`
    identity: OnceLock<Identity>,

    /// Topics this connection is subscribed to
    subscriptions: RwLock<BTreeSet<String>>,

    /// Channel to the socket writer task
    sender: mpsc::UnboundedSender<Outbound>,

    /// Cleared when a probe is sent, set again by any response
    is_alive: AtomicBool,

    /// Cancelled when the connection closes
    lifetime: CancellationToken,

    /// Cancels the authentication deadline (child of `lifetime`)
    auth_timer: CancellationToken,
}

impl Connection {
    /// Create a new unauthenticated connection
    pub fn new(sender: mpsc::UnboundedSender<Outbound>) -> Self {
        let lifetime = CancellationToken::new();
        let auth_timer = lifetime.child_token();
        Self {
            id: ConnectionId::new(),
            connected_at: Instant::now(),
            state: AtomicU8::new(AuthState::Unauthenticated as u8),
            identity: OnceLock::new(),
            subscriptions: RwLock::new(BTreeSet::new()),
            sender,
            is_alive: AtomicBool::new(true),
            lifetime,
            auth_timer,
        }
    }

    pub fn state(&self) -> AuthState {
        AuthState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == AuthState::Authenticated
    }

    /// Whether frames can still reach the client
    pub fn is_open(&self) -> bool {
        self.state() != AuthState::Closed && !self.sender.is_closed()
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    /// Bind the identity and move to `Authenticated`.
    ///
    /// Returns false if the connection is closed or was already promoted.
    pub(crate) fn mark_authenticated(&self, identity: Identity) -> bool {
        let promoted = self
            .state
            .compare_exchange(
                AuthState::Unauthenticated as u8,
                AuthState::Authenticated as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !promoted {
            return false;
        }
        // Only the CAS winner reaches this, so the cell is still empty
        let _ = self.identity.set(identity);
        self.auth_timer.cancel();
        true
    }

    /// Transition to `Closed`; returns true for the first caller only.
    ///
    /// The final frame is queued before `lifetime` is cancelled so the writer
    /// always sees it.
    fn mark_closed(&self, last_frame: Option<Outbound>) -> bool {
        let previous = self.state.swap(AuthState::Closed as u8, Ordering::AcqRel);
        if previous == AuthState::Closed as u8 {
            return false;
        }
        if let Some(frame) = last_frame {
            let _ = self.sender.send(frame);
        }
        self.lifetime.cancel();
        true
    }

    /// Close with a status code. Later close attempts are ignored.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        let closed = self.mark_closed(Some(Outbound::Close {
            code,
            reason: reason.to_string(),
        }));
        if closed {
            tracing::info!(
                connection_id = %self.id,
                code,
                reason,
                "Closing WebSocket connection"
            );
        }
        closed
    }

    /// Drop the transport without a close handshake
    pub fn terminate(&self) -> bool {
        self.mark_closed(Some(Outbound::Terminate))
    }

    /// Record the transport going away from the client side
    pub(crate) fn release(&self) {
        self.mark_closed(None);
    }

    /// Resolves once the connection is closed from any side
    pub async fn closed(&self) {
        self.lifetime.cancelled().await
    }

    pub(crate) fn auth_timer(&self) -> &CancellationToken {
        &self.auth_timer
    }

    pub(crate) fn cancel_auth_timer(&self) {
        self.auth_timer.cancel();
    }

    /// Send a pre-serialized text frame
    pub fn send_text(&self, text: Arc<str>) -> Result<(), SendError> {
        if self.state() == AuthState::Closed {
            return Err(SendError::Closed);
        }
        self.sender
            .send(Outbound::Text(text))
            .map_err(|_| SendError::Closed)
    }

    /// Serialize and send a message
    pub fn send_json<T: Serialize>(&self, message: &T) -> Result<(), SendError> {
        let json = serde_json::to_string(message)?;
        self.send_text(Arc::from(json))
    }

    /// Send a liveness probe
    pub fn send_ping(&self) -> Result<(), SendError> {
        if self.state() == AuthState::Closed {
            return Err(SendError::Closed);
        }
        self.sender.send(Outbound::Ping).map_err(|_| SendError::Closed)
    }

    /// Mark the connection as alive (pong or other client activity)
    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
    }

    /// Check and reset the alive flag for heartbeat.
    ///
    /// Returns `true` if the connection responded since the last check.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    /// Connection age
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Subscribe to a topic, returning the updated set
    pub async fn subscribe(&self, topic: &str) -> Vec<String> {
        let mut subs = self.subscriptions.write().await;
        subs.insert(topic.to_string());
        tracing::debug!(
            connection_id = %self.id,
            topic,
            "Subscribed to topic"
        );
        subs.iter().cloned().collect()
    }

    /// Unsubscribe from a topic, returning the updated set
    pub async fn unsubscribe(&self, topic: &str) -> Vec<String> {
        let mut subs = self.subscriptions.write().await;
        subs.remove(topic);
        tracing::debug!(
            connection_id = %self.id,
            topic,
            "Unsubscribed from topic"
        );
        subs.iter().cloned().collect()
    }

    /// Check if subscribed to a topic
    pub async fn is_subscribed(&self, topic: &str) -> bool {
        let subs = self.subscriptions.read().await;
        subs.contains(topic)
    }
}
