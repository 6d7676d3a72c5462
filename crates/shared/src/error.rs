//! Error types for Beacon collaborators

use thiserror::Error;

/// Failure reported by a [`DurableStore`](crate::DurableStore) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store command failed: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// Failure reported by a [`CredentialVerifier`](crate::CredentialVerifier).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// The credential was checked and is not acceptable.
    #[error("Credential rejected: {0}")]
    Rejected(String),

    /// The verifier could not reach a decision (network, upstream outage).
    #[error("Verifier unavailable: {0}")]
    Unavailable(String),
}

impl VerifyError {
    /// Whether the outcome is a definitive answer about the credential and
    /// may be remembered for later attempts with the same token.
    pub fn is_definitive(&self) -> bool {
        matches!(self, VerifyError::Rejected(_))
    }
}
