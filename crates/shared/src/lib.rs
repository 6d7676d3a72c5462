//! Beacon Shared Types and Collaborator Contracts
//!
//! This crate contains the identifiers, buffered-event record, and the two
//! external collaborator interfaces (credential verification and the durable
//! list store) that the notification hub is built against.

pub mod error;
pub mod store;
pub mod types;
pub mod verify;

pub use error::*;
pub use store::DurableStore;
pub use types::*;
pub use verify::{CredentialVerifier, VerifiedSubject};
