//! Topic subscription and fan-out
//!
//! Routes published events to the subset of an identity's connections that
//! are subscribed to the event's topic, deferring to the offline buffer when
//! none of them can take it.

use std::sync::Arc;

use beacon_shared::Identity;

use super::connection::Connection;
use super::events::{OutboundEvent, ServerMessage};
use super::registry::ConnectionRegistry;
use crate::buffer::OfflineBuffer;

/// Result of a `publish` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Written to this many live connections
    Delivered(usize),
    /// Handed to the offline buffer
    Buffered,
}

/// Subscription handling and event delivery
pub struct FanOut {
    registry: Arc<ConnectionRegistry>,
    buffer: Arc<OfflineBuffer>,
}

impl FanOut {
    pub fn new(registry: Arc<ConnectionRegistry>, buffer: Arc<OfflineBuffer>) -> Self {
        Self { registry, buffer }
    }

    /// Add `topic` to an authenticated connection and replay anything buffered for it.
    ///
    /// Returns false if the connection is not authenticated.
    pub async fn subscribe(&self, conn: &Connection, topic: &str) -> bool {
        let Some(identity) = conn.identity().filter(|_| conn.is_authenticated()) else {
            return false;
        };

        let active_subscriptions = conn.subscribe(topic).await;
        let buffered_message_count = match self.buffer.pending_count(identity, topic).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    identity = %identity,
                    topic,
                    "Failed to read buffered message count"
                );
                0
            }
        };

        if let Err(e) = conn.send_json(&ServerMessage::SubscriptionConfirmed {
            topic: topic.to_string(),
            active_subscriptions,
            buffered_message_count,
        }) {
            tracing::warn!(error = %e, connection_id = %conn.id, "Failed to confirm subscription");
            return true;
        }

        if buffered_message_count > 0 {
            // Errors are logged inside; the key stays for a later subscribe
            let _ = self.buffer.drain_and_send(conn, identity, topic).await;
        }

        true
    }

    /// Remove `topic` from a connection and confirm
    pub async fn unsubscribe(&self, conn: &Connection, topic: &str) -> bool {
        if !conn.is_authenticated() {
            return false;
        }

        let active_subscriptions = conn.unsubscribe(topic).await;
        if let Err(e) = conn.send_json(&ServerMessage::UnsubscriptionConfirmed {
            topic: topic.to_string(),
            active_subscriptions,
        }) {
            tracing::warn!(
                error = %e,
                connection_id = %conn.id,
                "Failed to confirm unsubscription"
            );
        }
        true
    }

    /// Deliver an event to every eligible connection of `identity`, or buffer it.
    pub async fn publish(
        &self,
        identity: &Identity,
        topic: &str,
        event: &OutboundEvent,
    ) -> PublishOutcome {
        let envelope = match serde_json::to_value(event.envelope()) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(
                    error = ?e,
                    identity = %identity,
                    topic,
                    "Failed to serialize event"
                );
                return PublishOutcome::Delivered(0);
            }
        };

        let mut targets = Vec::new();
        for conn in self.registry.connections_for(identity).await {
            if conn.is_authenticated() && conn.is_open() && conn.is_subscribed(topic).await {
                targets.push(conn);
            }
        }

        if targets.is_empty() {
            tracing::debug!(
                identity = %identity,
                topic,
                event_type = %event.event_type,
                "No subscribed connection, buffering event"
            );
            self.buffer.enqueue(identity, topic, envelope).await;
            return PublishOutcome::Buffered;
        }

        // Serialize once for all recipients
        let text: Arc<str> = Arc::from(envelope.to_string());
        let mut success_count = 0;
        let mut failed_count = 0;
        for conn in &targets {
            match conn.send_text(Arc::clone(&text)) {
                Ok(()) => success_count += 1,
                Err(e) => {
                    failed_count += 1;
                    tracing::warn!(
                        error = %e,
                        connection_id = %conn.id,
                        "Failed to send event to connection (likely closed)"
                    );
                }
            }
        }

        tracing::debug!(
            identity = %identity,
            topic,
            event_type = %event.event_type,
            recipients = success_count,
            failed = failed_count,
            "Published event"
        );

        if success_count == 0 {
            self.buffer.enqueue(identity, topic, envelope).await;
            return PublishOutcome::Buffered;
        }

        PublishOutcome::Delivered(success_count)
    }

    /// Deliver to every open authenticated connection of `identity`, ignoring topics.
    /// Nothing is buffered.
    pub async fn send_direct(&self, identity: &Identity, event: &OutboundEvent) -> usize {
        let connections = self.registry.connections_for(identity).await;
        let delivered = deliver(&connections, event);
        tracing::debug!(
            identity = %identity,
            event_type = %event.event_type,
            recipients = delivered,
            "Sent direct event"
        );
        delivered
    }

    /// Deliver to every open authenticated connection on the server. Best-effort.
    pub async fn broadcast(&self, event: &OutboundEvent) -> usize {
        let connections = self.registry.authenticated().await;
        let delivered = deliver(&connections, event);
        tracing::debug!(
            event_type = %event.event_type,
            recipients = delivered,
            "Broadcast event to all connections"
        );
        delivered
    }
}

/// Serialize once and write to each open authenticated connection
fn deliver(connections: &[Arc<Connection>], event: &OutboundEvent) -> usize {
    let text: Arc<str> = match serde_json::to_string(&event.envelope()) {
        Ok(json) => Arc::from(json),
        Err(e) => {
            tracing::error!(error = ?e, "Failed to serialize event");
            return 0;
        }
    };

    connections
        .iter()
        .filter(|c| c.is_authenticated() && c.is_open())
        .filter(|c| match c.send_text(Arc::clone(&text)) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    connection_id = %c.id,
                    "Failed to send event to connection"
                );
                false
            }
        })
        .count()
}
