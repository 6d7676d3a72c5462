//! Credential verification contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::VerifyError;

/// Result of a successful credential check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifiedSubject {
    /// Stable subject claim of the verified user
    pub subject: String,
    /// Unix time (seconds) after which the credential stops verifying, if it expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl VerifiedSubject {
    /// Subject for a credential that does not expire
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            expires_at: None,
        }
    }
}

/// Opaque "verify token → identity" capability.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedSubject, VerifyError>;
}
