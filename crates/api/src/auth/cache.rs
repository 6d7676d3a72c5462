//! In-memory verification cache with TTL
//!
//! Remembers the outcome of credential checks so clients that reconnect with
//! the same token (or keep retrying a bad one) do not trigger an external
//! round-trip on every attempt.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use beacon_shared::{CredentialVerifier, VerifiedSubject, VerifyError};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

/// Default cache TTL (5 minutes)
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Cache entry with expiration
#[derive(Clone)]
struct CacheEntry {
    outcome: Result<VerifiedSubject, VerifyError>,
    expires_at: Instant,
}

impl CacheEntry {
    fn new(outcome: Result<VerifiedSubject, VerifyError>, ttl: Duration) -> Self {
        Self {
            outcome,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Thread-safe token → verification outcome cache
pub struct TokenCache {
    /// Keyed by SHA-256 of the token so raw credentials are never retained
    cache: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCache {
    /// Create a new cache with default TTL
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_CACHE_TTL)
    }

    /// Create a new cache with custom TTL
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn key(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    /// Get the cached outcome for a token
    /// Returns None if not in cache or expired
    pub fn get(&self, token: &str) -> Option<Result<VerifiedSubject, VerifyError>> {
        let cache = self.cache.read().ok()?;
        let entry = cache.get(&Self::key(token))?;

        if entry.is_expired() {
            None
        } else {
            Some(entry.outcome.clone())
        }
    }

    /// Cache the outcome of a verification
    pub fn set(&self, token: &str, outcome: Result<VerifiedSubject, VerifyError>) {
        self.set_with_ttl(token, outcome, self.ttl);
    }

    /// Cache an outcome for at most `ttl` (never longer than the cache TTL)
    pub fn set_with_ttl(
        &self,
        token: &str,
        outcome: Result<VerifiedSubject, VerifyError>,
        ttl: Duration,
    ) {
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(Self::key(token), CacheEntry::new(outcome, ttl.min(self.ttl)));
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Clear expired entries (call periodically for memory management)
    pub fn cleanup(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.retain(|_, entry| !entry.is_expired());
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        if let Ok(cache) = self.cache.read() {
            let total = cache.len();
            let expired = cache.values().filter(|e| e.is_expired()).count();
            let rejected = cache
                .values()
                .filter(|e| !e.is_expired() && e.outcome.is_err())
                .count();
            CacheStats {
                total_entries: total,
                expired_entries: expired,
                active_entries: total - expired,
                rejected_entries: rejected,
            }
        } else {
            CacheStats::default()
        }
    }
}

/// Cache statistics
#[derive(Default, Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
    pub rejected_entries: usize,
}

/// Verifier decorator that consults a [`TokenCache`] before the inner verifier.
///
/// Successes and definitive rejections are cached; `Unavailable` outcomes are
/// not, so an upstream outage does not lock users out for a whole TTL. A
/// success is never cached past the credential's own expiry.
pub struct CachingVerifier {
    inner: Arc<dyn CredentialVerifier>,
    cache: TokenCache,
}

impl CachingVerifier {
    pub fn new(inner: Arc<dyn CredentialVerifier>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: TokenCache::with_ttl(ttl),
        }
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }
}

#[async_trait]
impl CredentialVerifier for CachingVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedSubject, VerifyError> {
        if let Some(outcome) = self.cache.get(token) {
            tracing::debug!(hit = outcome.is_ok(), "Token verification served from cache");
            return outcome;
        }

        let outcome = self.inner.verify(token).await;
        match &outcome {
            Ok(subject) => match remaining_validity(subject, self.cache.ttl()) {
                Some(ttl) => self.cache.set_with_ttl(token, outcome.clone(), ttl),
                None => tracing::debug!("Credential at or past expiry, outcome not cached"),
            },
            Err(e) if e.is_definitive() => self.cache.set(token, outcome.clone()),
            Err(e) => {
                tracing::warn!(error = %e, "Credential verifier unavailable, outcome not cached");
            }
        }

        outcome
    }
}

/// How long a verified subject may be served from cache
fn remaining_validity(subject: &VerifiedSubject, ttl: Duration) -> Option<Duration> {
    let Some(expires_at) = subject.expires_at else {
        return Some(ttl);
    };
    let now = OffsetDateTime::now_utc().unix_timestamp();
    let remaining = expires_at.saturating_sub(now);
    match u64::try_from(remaining) {
        Ok(secs) if secs > 0 => Some(ttl.min(Duration::from_secs(secs))),
        _ => None,
    }
}
