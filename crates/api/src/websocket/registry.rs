//! Connection registry
//!
//! Owns every live connection and the identity → connections index used by
//! fan-out. Lock order is always `connections` then `identities`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use beacon_shared::{ConnectionId, Identity};
use serde::Serialize;
use tokio::sync::RwLock;

use super::connection::Connection;

/// Registry of live connections
#[derive(Default)]
pub struct ConnectionRegistry {
    /// All active connections indexed by connection ID
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,

    /// Authenticated connections indexed by identity
    identities: RwLock<HashMap<Identity, HashSet<ConnectionId>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a connection in the unauthenticated state
    pub async fn register(&self, conn: Connection) -> Arc<Connection> {
        let conn = Arc::new(conn);
        let mut connections = self.connections.write().await;
        connections.insert(conn.id, Arc::clone(&conn));

        tracing::info!(
            connection_id = %conn.id,
            total_connections = connections.len(),
            "WebSocket connection registered"
        );

        conn
    }

    /// Bind `identity` to a registered connection and index it.
    ///
    /// No-op returning false when the connection is unknown, closed, or
    /// already authenticated.
    pub async fn promote(&self, connection_id: &ConnectionId, identity: Identity) -> bool {
        // Held across the index update so a concurrent deregister cannot
        // leave a dangling index entry.
        let connections = self.connections.read().await;
        let Some(conn) = connections.get(connection_id) else {
            return false;
        };
        if !conn.mark_authenticated(identity.clone()) {
            return false;
        }

        let mut identities = self.identities.write().await;
        let set = identities.entry(identity.clone()).or_default();
        set.insert(*connection_id);

        tracing::info!(
            connection_id = %connection_id,
            identity = %identity,
            identity_connections = set.len(),
            "WebSocket connection authenticated"
        );

        true
    }

    /// Remove a connection. Idempotent.
    pub async fn deregister(&self, connection_id: &ConnectionId) -> Option<Arc<Connection>> {
        let mut connections = self.connections.write().await;
        let conn = connections.remove(connection_id)?;
        conn.cancel_auth_timer();

        if let Some(identity) = conn.identity() {
            let mut identities = self.identities.write().await;
            if let Some(set) = identities.get_mut(identity) {
                set.remove(connection_id);
                if set.is_empty() {
                    identities.remove(identity);
                    tracing::debug!(identity = %identity, "Dropped empty identity entry");
                }
            }
        }

        tracing::info!(
            connection_id = %connection_id,
            identity = ?conn.identity().map(Identity::as_str),
            connected_secs = conn.age().as_secs(),
            remaining_connections = connections.len(),
            "WebSocket connection deregistered"
        );

        Some(conn)
    }

    /// Get a connection by ID
    pub async fn get(&self, connection_id: &ConnectionId) -> Option<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.get(connection_id).cloned()
    }

    /// Snapshot of the connections bound to an identity
    pub async fn connections_for(&self, identity: &Identity) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        let identities = self.identities.read().await;
        identities
            .get(identity)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| connections.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of every authenticated connection
    pub async fn authenticated(&self) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections
            .values()
            .filter(|c| c.is_authenticated())
            .cloned()
            .collect()
    }

    /// Snapshot of every tracked connection
    pub async fn all(&self) -> Vec<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.values().cloned().collect()
    }

    /// Get total number of tracked connections
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Get statistics about the registry
    pub async fn stats(&self) -> RegistryStats {
        let connections = self.connections.read().await;
        let identities = self.identities.read().await;
        RegistryStats {
            active_connections: connections.len(),
            authenticated_connections: connections
                .values()
                .filter(|c| c.is_authenticated())
                .count(),
            identities: identities.len(),
        }
    }
}

/// Statistics about tracked connections
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RegistryStats {
    /// Number of tracked connections (any state)
    pub active_connections: usize,
    /// Number of authenticated connections
    pub authenticated_connections: usize,
    /// Number of identities with at least one connection
    pub identities: usize,
}
