//! Shared fixtures for service tests.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use shared::{
    config::server::HistoryConfig,
    models::{Message, MessageType, SendMessageRequest, Timestamp},
};

use super::{
    ConnectionRegistry, ConversationCache, Dispatcher, DurableLog, HistoryResolver, MemoryLog,
    Presence, UnreadLedger,
};
use crate::store::{KeyValueStore, MemoryStore, SharedStore, StoreError, StoreResult};

pub(crate) const TOPIC: &str = "chat-messages";

/// Store whose every operation fails as if the backend were unreachable.
#[derive(Debug, Default)]
pub(crate) struct FailingStore;

fn down<T>() -> StoreResult<T> {
    Err(StoreError::Unavailable("connection refused".into()))
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn list_push_front_capped(&self, _: &str, _: String, _: usize) -> StoreResult<usize> {
        down()
    }
    async fn list_fill_if_empty(&self, _: &str, _: Vec<String>, _: usize) -> StoreResult<bool> {
        down()
    }
    async fn list_range(&self, _: &str, _: usize) -> StoreResult<Vec<String>> {
        down()
    }
    async fn list_len(&self, _: &str) -> StoreResult<usize> {
        down()
    }
    async fn hash_incr(&self, _: &str, _: &str, _: i64) -> StoreResult<i64> {
        down()
    }
    async fn hash_del(&self, _: &str, _: &str) -> StoreResult<()> {
        down()
    }
    async fn hash_get_all(&self, _: &str) -> StoreResult<HashMap<String, i64>> {
        down()
    }
    async fn set_with_ttl(&self, _: &str, _: String, _: Duration) -> StoreResult<()> {
        down()
    }
    async fn get(&self, _: &str) -> StoreResult<Option<String>> {
        down()
    }
    async fn delete(&self, _: &str) -> StoreResult<()> {
        down()
    }
}

/// Every service wired over one store and one log.
pub(crate) struct Fixture {
    pub log: Arc<MemoryLog>,
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Presence,
    pub cache: ConversationCache,
    pub unread: UnreadLedger,
    pub dispatcher: Dispatcher,
    pub history: HistoryResolver,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn with_store(store: SharedStore) -> Self {
        Self::with_parts(store, Arc::new(MemoryLog::new()))
    }

    pub fn with_parts(store: SharedStore, log: Arc<MemoryLog>) -> Self {
        Self::build(store, Arc::clone(&log) as Arc<dyn DurableLog>, log)
    }

    pub fn build(store: SharedStore, durable: Arc<dyn DurableLog>, log: Arc<MemoryLog>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = Presence::new(
            Arc::clone(&store),
            Duration::from_secs(3_600),
            Duration::from_secs(86_400),
        );
        let cache = ConversationCache::new(Arc::clone(&store), 100);
        let unread = UnreadLedger::new(Arc::clone(&store));
        let dispatcher = Dispatcher::new(
            Arc::clone(&durable),
            TOPIC,
            cache.clone(),
            presence.clone(),
            Arc::clone(&registry),
            unread.clone(),
        );
        let history = HistoryResolver::new(
            durable,
            TOPIC,
            Duration::from_secs(2),
            cache.clone(),
            unread.clone(),
            HistoryConfig::default(),
        );

        Self {
            log,
            registry,
            presence,
            cache,
            unread,
            dispatcher,
            history,
        }
    }
}

pub(crate) fn request(sender: &str, receiver: &str, content: &str) -> SendMessageRequest {
    SendMessageRequest {
        sender_id: sender.into(),
        sender: None,
        receiver_id: receiver.into(),
        content: content.into(),
        msg_type: None,
    }
}

/// A message stamped `second` seconds after a fixed instant.
pub(crate) fn message_at(sender: &str, receiver: &str, second: i64, content: &str) -> Message {
    let base = Utc.with_ymd_and_hms(2025, 3, 8, 14, 30, 0).unwrap();
    Message {
        sender_id: sender.into(),
        sender: String::new(),
        receiver_id: receiver.into(),
        content: content.into(),
        timestamp: Timestamp(base + chrono::Duration::seconds(second)),
        msg_type: MessageType::Text,
    }
}
