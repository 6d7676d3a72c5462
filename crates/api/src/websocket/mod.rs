//! WebSocket support for real-time notifications
//!
//! Provides the connection layer for pushing application events to end-user
//! devices:
//! - Out-of-band authentication after the upgrade
//! - Topic subscriptions with per-identity fan-out
//! - Replay of events buffered while a device was offline
//! - Heartbeat-based reclamation of dead connections
//!
//! # Architecture
//!
//! - **Connection**: One transport with its auth state, subscriptions, and outbound queue
//! - **Registry**: Connection lookup plus the identity index
//! - **Handshake**: Auth deadline and credential verification
//! - **FanOut**: Subscribe/unsubscribe and event delivery
//! - **Liveness**: Periodic ping sweep
//! - **Hub**: Owns all of the above and the shutdown path
//! - **Handler**: Axum WebSocket route handler
//! - **Events**: Type-safe message definitions for client/server communication

pub mod connection;
pub mod events;
pub mod fanout;
pub mod handler;
pub mod handshake;
pub mod hub;
pub mod liveness;
pub mod registry;

pub use events::{close_code, OutboundEvent};
pub use fanout::PublishOutcome;
pub use handler::ws_handler;
pub use hub::{HubConfig, NotificationHub};
pub use registry::RegistryStats;
