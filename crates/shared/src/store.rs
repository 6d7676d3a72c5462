//! Durable list store contract
//!
//! The offline buffer only relies on the atomic list primitives below. Index
//! arguments follow Redis list semantics: inclusive on both ends, negative
//! values count from the tail (`-1` is the last element).

use async_trait::async_trait;

use crate::error::StoreError;

#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Append `value` to the tail of the list at `key`, returning the new length.
    async fn list_append(&self, key: &str, value: String) -> Result<usize, StoreError>;

    /// Keep only the elements in `start..=end`.
    async fn list_trim(&self, key: &str, start: isize, end: isize) -> Result<(), StoreError>;

    /// Read the elements in `start..=end`, head first.
    async fn list_range(&self, key: &str, start: isize, end: isize)
        -> Result<Vec<String>, StoreError>;

    /// Length of the list at `key` (0 when absent).
    async fn list_length(&self, key: &str) -> Result<usize, StoreError>;

    /// Expire the whole key after `seconds`.
    async fn expire(&self, key: &str, seconds: u64) -> Result<(), StoreError>;

    /// Remove the key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
