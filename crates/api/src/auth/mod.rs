//! Authentication module for Beacon
//!
//! Credential verification adapters consumed by the websocket handshake.

pub mod cache;
pub mod jwt;

pub use cache::{CacheStats, CachingVerifier, TokenCache};
pub use jwt::{Claims, JwtError, JwtVerifier};
