//! Application configuration

use std::env;
use std::time::Duration;

use crate::buffer::BufferConfig;
use crate::websocket::HubConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub shutdown_grace: Duration,

    // Redis (in-memory buffer store when unset)
    pub redis_url: Option<String>,

    // Authentication
    pub jwt_secret: String,
    pub identity_namespace: String,
    pub token_cache_ttl: Duration,

    // WebSocket
    pub auth_timeout: Duration,
    pub heartbeat_interval: Duration,

    // Offline buffer
    pub buffer_max_messages: usize,
    pub buffer_ttl_secs: u64,
    pub buffer_delivery_window_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            shutdown_grace: Duration::from_secs(parse_or("SHUTDOWN_GRACE_SECS", 10)),

            // Redis
            redis_url: env::var("REDIS_URL").ok().filter(|url| !url.trim().is_empty()),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            identity_namespace: {
                let namespace =
                    env::var("IDENTITY_NAMESPACE").unwrap_or_else(|_| "apple".to_string());
                if namespace.is_empty() || namespace.contains(':') {
                    return Err(ConfigError::Invalid(
                        "IDENTITY_NAMESPACE must be non-empty and must not contain ':'",
                    ));
                }
                namespace
            },
            token_cache_ttl: Duration::from_secs(parse_or("TOKEN_CACHE_TTL_SECS", 300)),

            // WebSocket
            auth_timeout: Duration::from_millis(parse_or("WS_AUTH_TIMEOUT_MS", 10_000)),
            heartbeat_interval: {
                let secs: u64 = parse_or("WS_HEARTBEAT_INTERVAL_SECS", 30);
                if secs == 0 {
                    return Err(ConfigError::Invalid(
                        "WS_HEARTBEAT_INTERVAL_SECS must be greater than zero",
                    ));
                }
                Duration::from_secs(secs)
            },

            // Offline buffer
            buffer_max_messages: {
                let max: usize = parse_or("BUFFER_MAX_MESSAGES", 100);
                if max == 0 {
                    return Err(ConfigError::Invalid(
                        "BUFFER_MAX_MESSAGES must be greater than zero",
                    ));
                }
                max
            },
            buffer_ttl_secs: parse_or("BUFFER_TTL_SECS", 86_400),
            buffer_delivery_window_secs: parse_or("BUFFER_DELIVERY_WINDOW_SECS", 86_400),
        })
    }

    /// Subsystem settings for the notification hub
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            auth_timeout: self.auth_timeout,
            heartbeat_interval: self.heartbeat_interval,
            identity_namespace: self.identity_namespace.clone(),
            buffer: BufferConfig {
                max_messages: self.buffer_max_messages,
                ttl_secs: self.buffer_ttl_secs,
                delivery_window: Duration::from_secs(self.buffer_delivery_window_secs),
            },
        }
    }
}

/// Parse an optional numeric variable, falling back to `default` when unset or malformed
fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
