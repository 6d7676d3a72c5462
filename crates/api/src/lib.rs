//! Beacon API Library
//!
//! Real-time notification delivery over WebSockets: connection registry,
//! in-band authentication, topic fan-out, and a durable offline buffer.

pub mod auth;
pub mod buffer;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
pub use websocket::{HubConfig, NotificationHub, OutboundEvent, PublishOutcome};
