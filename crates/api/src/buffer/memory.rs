//! In-process durable store
//!
//! Implements the list primitives with Redis semantics (inclusive ranges,
//! negative indices from the tail, lazy key expiry). Used when no Redis URL is
//! configured and as the fake store in tests. Contents do not survive a
//! restart.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use beacon_shared::{DurableStore, StoreError};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct ListEntry {
    items: VecDeque<String>,
    expires_at: Option<Instant>,
}

impl ListEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Resolve a Redis-style inclusive range against a list of `len` elements
fn resolve_range(start: isize, end: isize, len: usize) -> Option<(usize, usize)> {
    let len = isize::try_from(len).ok()?;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let end = if end < 0 { len + end } else { end.min(len - 1) };
    if len == 0 || start > end || start >= len || end < 0 {
        return None;
    }
    Some((usize::try_from(start).ok()?, usize::try_from(end).ok()?))
}

/// Mutex-guarded map of lists
#[derive(Debug, Default)]
pub struct MemoryStore {
    lists: Mutex<HashMap<String, ListEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining time to live of a key, if it exists and has an expiry
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let lists = self.lists.lock().await;
        let entry = lists.get(key).filter(|e| !e.is_expired(now))?;
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Number of live keys
    pub async fn key_count(&self) -> usize {
        let now = Instant::now();
        let lists = self.lists.lock().await;
        lists.values().filter(|e| !e.is_expired(now)).count()
    }

    fn live<'a>(
        lists: &'a mut HashMap<String, ListEntry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a mut ListEntry> {
        if lists.get(key).is_some_and(|e| e.is_expired(now)) {
            lists.remove(key);
        }
        lists.get_mut(key)
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn list_append(&self, key: &str, value: String) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut lists = self.lists.lock().await;
        if lists.get(key).is_some_and(|e| e.is_expired(now)) {
            lists.remove(key);
        }
        let entry = lists.entry(key.to_string()).or_default();
        entry.items.push_back(value);
        Ok(entry.items.len())
    }

    async fn list_trim(&self, key: &str, start: isize, end: isize) -> Result<(), StoreError> {
        let mut lists = self.lists.lock().await;
        let Some(entry) = Self::live(&mut lists, key, Instant::now()) else {
            return Ok(());
        };
        match resolve_range(start, end, entry.items.len()) {
            Some((from, to)) => {
                entry.items.truncate(to + 1);
                entry.items.drain(..from);
            }
            None => entry.items.clear(),
        }
        if entry.items.is_empty() {
            lists.remove(key);
        }
        Ok(())
    }

    async fn list_range(
        &self,
        key: &str,
        start: isize,
        end: isize,
    ) -> Result<Vec<String>, StoreError> {
        let mut lists = self.lists.lock().await;
        let Some(entry) = Self::live(&mut lists, key, Instant::now()) else {
            return Ok(Vec::new());
        };
        Ok(match resolve_range(start, end, entry.items.len()) {
            Some((from, to)) => entry.items.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn list_length(&self, key: &str) -> Result<usize, StoreError> {
        let mut lists = self.lists.lock().await;
        Ok(Self::live(&mut lists, key, Instant::now())
            .map(|e| e.items.len())
            .unwrap_or(0))
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut lists = self.lists.lock().await;
        if let Some(entry) = Self::live(&mut lists, key, now) {
            entry.expires_at = Some(now + Duration::from_secs(seconds));
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lists.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn filled(n: usize) -> MemoryStore {
        let store = MemoryStore::new();
        for i in 0..n {
            store.list_append("k", i.to_string()).await.unwrap();
        }
        store
    }

    #[test]
    fn test_resolve_range() {
        assert_eq!(resolve_range(0, -1, 5), Some((0, 4)));
        assert_eq!(resolve_range(-3, -1, 5), Some((2, 4)));
        assert_eq!(resolve_range(-10, -1, 5), Some((0, 4)));
        assert_eq!(resolve_range(1, 100, 5), Some((1, 4)));
        assert_eq!(resolve_range(3, 1, 5), None);
        assert_eq!(resolve_range(7, 9, 5), None);
        assert_eq!(resolve_range(0, -1, 0), None);
    }

    #[tokio::test]
    async fn test_append_and_range() {
        let store = filled(3).await;
        assert_eq!(store.list_length("k").await.unwrap(), 3);
        assert_eq!(
            store.list_range("k", 0, -1).await.unwrap(),
            vec!["0", "1", "2"]
        );
        assert!(store.list_range("missing", 0, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trim_keeps_tail() {
        let store = filled(5).await;
        store.list_trim("k", -2, -1).await.unwrap();
        assert_eq!(store.list_range("k", 0, -1).await.unwrap(), vec!["3", "4"]);
    }

    #[tokio::test]
    async fn test_trim_to_empty_removes_key() {
        let store = filled(2).await;
        store.list_trim("k", 5, 10).await.unwrap();
        assert_eq!(store.key_count().await, 0);
    }

    #[tokio::test]
    async fn test_expire() {
        let store = filled(1).await;
        store.expire("k", 0).await.unwrap();
        assert_eq!(store.list_length("k").await.unwrap(), 0);
        assert!(store.ttl("k").await.is_none());
    }

    #[tokio::test]
    async fn test_append_after_expiry_starts_fresh() {
        let store = filled(2).await;
        store.expire("k", 0).await.unwrap();
        assert_eq!(store.list_append("k", "new".into()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_double_delete() {
        let store = filled(1).await;
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.list_length("k").await.unwrap(), 0);
    }
}
