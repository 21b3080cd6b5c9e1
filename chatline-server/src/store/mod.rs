//! Primitive key-value operations shared by the cache, presence and unread ledger.

mod memory;

pub use memory::MemoryStore;

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key '{0}' holds a value of a different type")]
    WrongType(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("failed to encode or decode stored value: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Lists, counter hashes and expiring strings keyed by name.
///
/// Every operation is atomic with respect to the single key it touches.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Pushes `value` at the head of the list and trims it to `cap` entries.
    /// Returns the list length after trimming.
    async fn list_push_front_capped(&self, key: &str, value: String, cap: usize)
    -> StoreResult<usize>;

    /// Appends `values` (newest first) only if the list is empty or missing,
    /// then trims it to `cap`. Returns whether anything was written.
    async fn list_fill_if_empty(&self, key: &str, values: Vec<String>, cap: usize)
    -> StoreResult<bool>;

    /// Up to `limit` entries from the head of the list.
    async fn list_range(&self, key: &str, limit: usize) -> StoreResult<Vec<String>>;

    async fn list_len(&self, key: &str) -> StoreResult<usize>;

    /// Adds `delta` to a hash field, creating it at zero. Returns the new value.
    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64>;

    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<()>;

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, i64>>;

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn delete(&self, key: &str) -> StoreResult<()>;
}

pub type SharedStore = Arc<dyn KeyValueStore>;
