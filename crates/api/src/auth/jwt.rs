//! JWT credential verification

use async_trait::async_trait;
use beacon_shared::{CredentialVerifier, VerifiedSubject, VerifyError};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Clock skew tolerated on `exp`
const LEEWAY_SECS: u64 = 30;

/// Claims carried by tokens presented over the `auth` message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (provider user ID)
    pub sub: String,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// HS256 verifier for session tokens issued by the account service
#[derive(Clone)]
pub struct JwtVerifier {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a new verifier for the shared signing secret
    pub fn new(secret: &str) -> Self {
        // Explicit algorithm prevents algorithm confusion attacks
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECS;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Issue a token for `subject` (local tooling and tests)
    pub fn generate_token(&self, subject: &str, ttl: Duration) -> Result<String, JwtError> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.unix_timestamp(),
            exp: (now + ttl).unix_timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    /// Decode and validate a token
    pub fn validate(&self, token: &str) -> Result<Claims, JwtError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Invalid(e.to_string()),
            }
        })?;

        if data.claims.sub.trim().is_empty() {
            return Err(JwtError::Invalid("empty subject".to_string()));
        }

        Ok(data.claims)
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedSubject, VerifyError> {
        let claims = self
            .validate(token)
            .map_err(|e| VerifyError::Rejected(e.to_string()))?;

        // Last second at which `validate` still accepts the token
        let leeway = i64::try_from(LEEWAY_SECS).unwrap_or(i64::MAX);
        Ok(VerifiedSubject {
            subject: claims.sub,
            expires_at: Some(claims.exp.saturating_add(leeway)),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("Token encoding failed: {0}")]
    Encoding(String),
    #[error("Token expired")]
    Expired,
    #[error("Invalid token: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-jwt-secret-must-be-at-least-32-characters-long";

    #[tokio::test]
    async fn test_roundtrip_verification() {
        let verifier = JwtVerifier::new(SECRET);
        let token = verifier.generate_token("u1", Duration::hours(1)).unwrap();

        let subject = verifier.verify(&token).await.unwrap();
        assert_eq!(subject.subject, "u1");
    }

    #[tokio::test]
    async fn test_expiry_includes_leeway() {
        let verifier = JwtVerifier::new(SECRET);
        let token = verifier.generate_token("u1", Duration::minutes(5)).unwrap();
        let claims = verifier.validate(&token).unwrap();

        let subject = verifier.verify(&token).await.unwrap();
        assert_eq!(subject.expires_at, Some(claims.exp + 30));
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        let token = verifier.generate_token("u1", Duration::hours(-2)).unwrap();

        assert!(matches!(verifier.validate(&token), Err(JwtError::Expired)));
        assert!(matches!(
            verifier.verify(&token).await,
            Err(VerifyError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_wrong_secret_rejected() {
        let issuer = JwtVerifier::new("another-secret-that-is-also-32-characters-long");
        let verifier = JwtVerifier::new(SECRET);
        let token = issuer.generate_token("u1", Duration::hours(1)).unwrap();

        assert!(matches!(verifier.validate(&token), Err(JwtError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_garbage_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        assert!(matches!(
            verifier.verify("not-a-jwt").await,
            Err(VerifyError::Rejected(_))
        ));
    }

    #[test]
    fn test_empty_subject_rejected() {
        let verifier = JwtVerifier::new(SECRET);
        let token = verifier.generate_token("  ", Duration::hours(1)).unwrap();
        assert!(matches!(verifier.validate(&token), Err(JwtError::Invalid(_))));
    }
}
