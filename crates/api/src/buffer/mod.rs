//! Durable offline buffer
//!
//! Holds events for (identity, topic) pairs that had no eligible live
//! connection at publish time, and replays them when a connection subscribes.
//!
//! Replay is best-effort: the key is cleared after one complete pass even if
//! the connection went away part way through, so entries that were in flight
//! at that moment are lost rather than re-buffered.

pub mod memory;
pub mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use beacon_shared::{now_millis, BufferedEvent, DurableStore, Identity, StoreError};
use serde_json::Value;

use crate::websocket::connection::Connection;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

/// Buffer bounds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferConfig {
    /// Entries kept per key (oldest evicted first)
    pub max_messages: usize,
    /// Idle expiry of a key, reset on every write
    pub ttl_secs: u64,
    /// Entries older than this are discarded at replay time
    pub delivery_window: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            max_messages: 100,
            ttl_secs: 86_400,
            delivery_window: Duration::from_secs(86_400),
        }
    }
}

/// Outcome of one replay pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    /// Entries written to the connection
    pub sent: usize,
    /// Entries older than the delivery window
    pub expired: usize,
    /// Entries that could not be decoded
    pub malformed: usize,
    /// Entries skipped because the connection closed mid-replay
    pub dropped: usize,
    /// Whether the key was deleted after the pass
    pub cleared: bool,
}

impl ReplayReport {
    fn processed(&self) -> usize {
        self.sent + self.expired + self.malformed
    }
}

/// Per-(identity, topic) offline queue on top of a [`DurableStore`]
pub struct OfflineBuffer {
    store: Arc<dyn DurableStore>,
    config: BufferConfig,
}

impl OfflineBuffer {
    pub fn new(store: Arc<dyn DurableStore>, config: BufferConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Storage key for an (identity, topic) pair
    pub fn key(identity: &Identity, topic: &str) -> String {
        format!("ws:buffer:{identity}:{topic}")
    }

    /// Append a message for later delivery.
    ///
    /// Store failures are logged and the message is lost; publishers are
    /// never blocked or failed by the buffer.
    pub async fn enqueue(&self, identity: &Identity, topic: &str, payload: Value) -> bool {
        let key = Self::key(identity, topic);
        let entry = BufferedEvent::new(identity.clone(), topic, payload);
        let encoded = match serde_json::to_string(&entry) {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(
                    error = ?e,
                    identity = %identity,
                    topic,
                    "Failed to encode buffered event"
                );
                return false;
            }
        };

        let length = match self.store.list_append(&key, encoded).await {
            Ok(length) => length,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    identity = %identity,
                    topic,
                    "Failed to buffer message, dropping it"
                );
                return false;
            }
        };

        let keep = isize::try_from(self.config.max_messages).unwrap_or(isize::MAX);
        if let Err(e) = self.store.list_trim(&key, -keep, -1).await {
            tracing::error!(error = %e, key = %key, "Failed to trim offline buffer");
        }
        if let Err(e) = self.store.expire(&key, self.config.ttl_secs).await {
            tracing::error!(error = %e, key = %key, "Failed to set offline buffer expiry");
        }

        tracing::debug!(
            identity = %identity,
            topic,
            buffered = length.min(self.config.max_messages),
            "Buffered message for offline delivery"
        );
        true
    }

    /// Number of entries awaiting replay
    pub async fn pending_count(
        &self,
        identity: &Identity,
        topic: &str,
    ) -> Result<usize, StoreError> {
        self.store.list_length(&Self::key(identity, topic)).await
    }

    /// Replay buffered entries to `conn` in enqueue order, then clear the key.
    ///
    /// A read failure leaves the key untouched for a later attempt.
    pub async fn drain_and_send(
        &self,
        conn: &Connection,
        identity: &Identity,
        topic: &str,
    ) -> Result<ReplayReport, StoreError> {
        let key = Self::key(identity, topic);
        let entries = self.store.list_range(&key, 0, -1).await.map_err(|e| {
            tracing::error!(error = %e, key = %key, "Failed to read offline buffer");
            e
        })?;

        let mut report = ReplayReport::default();
        if entries.is_empty() {
            return Ok(report);
        }

        let now = now_millis();
        let window = i64::try_from(self.config.delivery_window.as_millis()).unwrap_or(i64::MAX);

        for raw in &entries {
            if !conn.is_open() {
                report.dropped += 1;
                continue;
            }

            let event = match serde_json::from_str::<BufferedEvent>(raw) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, key = %key, "Discarding undecodable buffered entry");
                    report.malformed += 1;
                    continue;
                }
            };

            if event.age_millis(now) > window {
                report.expired += 1;
                continue;
            }

            match conn.send_json(&event.payload) {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        connection_id = %conn.id,
                        "Connection closed during buffer replay"
                    );
                    report.dropped += 1;
                }
            }
        }

        if report.processed() > 0 {
            match self.store.delete(&key).await {
                Ok(()) => report.cleared = true,
                Err(e) => tracing::error!(error = %e, key = %key, "Failed to clear offline buffer"),
            }
        }

        tracing::info!(
            connection_id = %conn.id,
            identity = %identity,
            topic,
            sent = report.sent,
            expired = report.expired,
            dropped = report.dropped,
            cleared = report.cleared,
            "Replayed offline buffer"
        );

        Ok(report)
    }
}
