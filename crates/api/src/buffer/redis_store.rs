//! Redis-backed durable store

use std::time::Duration;

use async_trait::async_trait;
use beacon_shared::{DurableStore, StoreError};
use redis::{aio::ConnectionManager, AsyncCommands, RedisError};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

/// Base delay for the initial connection retries
const CONNECT_BASE_DELAY_MS: u64 = 200;
/// Upper bound on a single retry delay
const CONNECT_MAX_DELAY: Duration = Duration::from_secs(5);
/// Connection attempts before giving up at startup
const CONNECT_MAX_RETRIES: usize = 5;

/// Offline buffer store on Redis lists
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Connect with exponential backoff.
    ///
    /// The returned manager reconnects on its own after startup.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;

        let retry_strategy = ExponentialBackoff::from_millis(CONNECT_BASE_DELAY_MS)
            .max_delay(CONNECT_MAX_DELAY)
            .take(CONNECT_MAX_RETRIES)
            .map(jitter);

        let conn = Retry::spawn(retry_strategy, || {
            let client = client.clone();
            async move {
                ConnectionManager::new(client).await.map_err(|e| {
                    tracing::warn!(error = %e, "Redis connection attempt failed");
                    e
                })
            }
        })
        .await
        .map_err(map_redis_error)?;

        tracing::info!("Connected to Redis offline buffer store");
        Ok(Self { conn })
    }
}

/// Classify a Redis failure for the buffer's error handling
fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
    {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Command(err.to_string())
    }
}

#[async_trait]
impl DurableStore for RedisStore {
    async fn list_append(&self, key: &str, value: String) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        conn.rpush(key, value).await.map_err(map_redis_error)
    }

    async fn list_trim(&self, key: &str, start: isize, end: isize) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.ltrim(key, start, end).await.map_err(map_redis_error)
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        end: isize,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.lrange(key, start, end).await.map_err(map_redis_error)
    }

    async fn list_length(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        conn.llen(key).await.map_err(map_redis_error)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let seconds = i64::try_from(seconds).unwrap_or(i64::MAX);
        conn.expire::<_, ()>(key, seconds)
            .await
            .map_err(map_redis_error)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(map_redis_error)
    }
}
