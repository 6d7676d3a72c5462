//! Shared application state

use std::sync::Arc;

use crate::auth::CachingVerifier;
use crate::config::Config;
use crate::websocket::NotificationHub;

/// State handed to every route
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: Arc<NotificationHub>,
    /// Same verifier the hub authenticates through, kept for its cache stats
    pub verifier: Arc<CachingVerifier>,
}

impl AppState {
    pub fn new(config: Config, hub: Arc<NotificationHub>, verifier: Arc<CachingVerifier>) -> Self {
        Self {
            config: Arc::new(config),
            hub,
            verifier,
        }
    }
}
