use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{sync::Mutex, time::Instant};

use super::{KeyValueStore, StoreError, StoreResult};

#[derive(Debug)]
enum Value {
    List(VecDeque<String>),
    Hash(HashMap<String, i64>),
    Text(String),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Process-local store. Expired keys are dropped lazily when next touched.
///
/// Expiry follows the tokio clock, so paused-time tests can advance past a TTL.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn live_entry<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn list_mut<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
) -> StoreResult<&'a mut VecDeque<String>> {
    if live_entry(entries, key).is_none() {
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::List(VecDeque::new()),
                expires_at: None,
            },
        );
    }
    match entries.get_mut(key).map(|entry| &mut entry.value) {
        Some(Value::List(list)) => Ok(list),
        _ => Err(StoreError::WrongType(key.to_string())),
    }
}

fn hash_mut<'a>(
    entries: &'a mut HashMap<String, Entry>,
    key: &str,
) -> StoreResult<&'a mut HashMap<String, i64>> {
    if live_entry(entries, key).is_none() {
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Hash(HashMap::new()),
                expires_at: None,
            },
        );
    }
    match entries.get_mut(key).map(|entry| &mut entry.value) {
        Some(Value::Hash(hash)) => Ok(hash),
        _ => Err(StoreError::WrongType(key.to_string())),
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn list_push_front_capped(
        &self,
        key: &str,
        value: String,
        cap: usize,
    ) -> StoreResult<usize> {
        let mut entries = self.entries.lock().await;
        let list = list_mut(&mut entries, key)?;
        list.push_front(value);
        list.truncate(cap);
        Ok(list.len())
    }

    async fn list_fill_if_empty(
        &self,
        key: &str,
        values: Vec<String>,
        cap: usize,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        let list = list_mut(&mut entries, key)?;
        if !list.is_empty() || values.is_empty() {
            return Ok(false);
        }
        list.extend(values.into_iter().take(cap));
        Ok(true)
    }

    async fn list_range(&self, key: &str, limit: usize) -> StoreResult<Vec<String>> {
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key).map(|entry| &entry.value) {
            None => Ok(Vec::new()),
            Some(Value::List(list)) => Ok(list.iter().take(limit).cloned().collect()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn list_len(&self, key: &str) -> StoreResult<usize> {
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key).map(|entry| &entry.value) {
            None => Ok(0),
            Some(Value::List(list)) => Ok(list.len()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn hash_incr(&self, key: &str, field: &str, delta: i64) -> StoreResult<i64> {
        let mut entries = self.entries.lock().await;
        let hash = hash_mut(&mut entries, key)?;
        let count = hash.entry(field.to_string()).or_insert(0);
        *count += delta;
        Ok(*count)
    }

    async fn hash_del(&self, key: &str, field: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key).map(|entry| &mut entry.value) {
            None => Ok(()),
            Some(Value::Hash(hash)) => {
                hash.remove(field);
                Ok(())
            }
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, i64>> {
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key).map(|entry| &entry.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        match live_entry(&mut entries, key).map(|entry| &entry.value) {
            None => Ok(None),
            Some(Value::Text(text)) => Ok(Some(text.clone())),
            Some(_) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
