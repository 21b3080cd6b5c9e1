use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::stream::BoxStream;
use shared::models::{ConversationKey, Delivery, LiveEvent, Message};
use tokio::sync::Mutex;

use super::{
    ConnectionHandle, DispatchError, DurableLog, LogError, MemoryLog,
    testing::{FailingStore, Fixture, TOPIC, request},
};
use crate::store::{KeyValueStore, MemoryStore, SharedStore};

fn key(a: &str, b: &str) -> ConversationKey {
    ConversationKey::new(a, b).unwrap()
}

#[tokio::test]
async fn offline_receiver_gets_unread_tally() {
    let fx = Fixture::new();

    let receipt = fx.dispatcher.submit(request("u1", "u2", "hello")).await.unwrap();

    assert_eq!(receipt.delivery, Delivery::Unread { count: 1 });
    assert_eq!(receipt.message.sender_id, "u1");
    assert_eq!(fx.log.len(TOPIC).await, 1);
    assert_eq!(fx.cache.len(&key("u1", "u2")).await.unwrap(), 1);
    assert_eq!(fx.unread.get_all("u2").await.unwrap().get("u1"), Some(&1));
}

#[tokio::test]
async fn every_offline_message_adds_one() {
    let fx = Fixture::new();
    for expected in 1..=3 {
        let receipt = fx.dispatcher.submit(request("u1", "u2", "ping")).await.unwrap();
        assert_eq!(receipt.delivery, Delivery::Unread { count: expected });
    }
    assert_eq!(fx.unread.get_all("u2").await.unwrap().get("u1"), Some(&3));
}

#[tokio::test]
async fn online_receiver_gets_live_frame_and_no_tally() {
    let fx = Fixture::new();
    let (handle, mut events) = ConnectionHandle::new(8);
    fx.registry.register("u2", handle).await;
    fx.presence.set_online("u2").await.unwrap();

    let receipt = fx.dispatcher.submit(request("u1", "u2", "hello")).await.unwrap();

    assert_eq!(receipt.delivery, Delivery::Live { delivered: true });
    match events.recv().await {
        Some(LiveEvent::Message { message }) => assert_eq!(message.content, "hello"),
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(fx.unread.get_all("u2").await.unwrap().is_empty());
}

#[tokio::test]
async fn online_without_connection_is_dropped_not_tallied() {
    let fx = Fixture::new();
    fx.presence.set_online("u2").await.unwrap();

    let receipt = fx.dispatcher.submit(request("u1", "u2", "hello")).await.unwrap();

    assert_eq!(receipt.delivery, Delivery::Live { delivered: false });
    assert!(fx.unread.get_all("u2").await.unwrap().is_empty());
    assert_eq!(fx.log.len(TOPIC).await, 1);
}

#[tokio::test]
async fn invalid_request_has_no_side_effects() {
    let fx = Fixture::new();

    let err = fx.dispatcher.submit(request("u1", "u2", "   ")).await.unwrap_err();

    assert!(matches!(err, DispatchError::Validation(_)));
    assert_eq!(err.code(), "validation_failed");
    assert_eq!(fx.log.len(TOPIC).await, 0);
    assert_eq!(fx.cache.len(&key("u1", "u2")).await.unwrap(), 0);
    assert!(fx.unread.get_all("u2").await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_append_stops_the_flow() {
    let fx = Fixture::new();
    let (handle, mut events) = ConnectionHandle::new(8);
    fx.registry.register("u2", handle).await;
    fx.presence.set_online("u2").await.unwrap();
    fx.log.set_available(false);

    let err = fx.dispatcher.submit(request("u1", "u2", "hello")).await.unwrap_err();

    assert!(matches!(err, DispatchError::Persistence(LogError::Unavailable(_))));
    assert_eq!(err.code(), "persistence_failed");
    assert_eq!(fx.cache.len(&key("u1", "u2")).await.unwrap(), 0);
    assert!(events.try_recv().is_err());

    fx.presence.set_offline("u2").await.unwrap();
    assert!(fx.dispatcher.submit(request("u1", "u2", "again")).await.is_err());
    assert!(fx.unread.get_all("u2").await.unwrap().is_empty());
}

#[tokio::test]
async fn cache_failure_does_not_fail_dispatch() {
    let store = Arc::new(MemoryStore::new());
    store
        .set_with_ttl("chat:u1:u2", "not a list".into(), Duration::from_secs(600))
        .await
        .unwrap();
    let fx = Fixture::with_store(store);

    let receipt = fx.dispatcher.submit(request("u1", "u2", "hello")).await.unwrap();

    assert_eq!(receipt.delivery, Delivery::Unread { count: 1 });
    assert_eq!(fx.log.len(TOPIC).await, 1);
}

#[tokio::test]
async fn unreachable_store_still_persists() {
    let fx = Fixture::with_store(Arc::new(FailingStore));

    let receipt = fx.dispatcher.submit(request("u1", "u2", "hello")).await.unwrap();

    assert_eq!(receipt.delivery, Delivery::Unrecorded);
    assert_eq!(fx.log.len(TOPIC).await, 1);
}

#[tokio::test]
async fn frame_is_sent_as_channel_owner() {
    let fx = Fixture::new();

    let receipt = fx
        .dispatcher
        .submit_frame("u1", request("mallory", "u2", "hi"))
        .await
        .unwrap();

    assert_eq!(receipt.message.sender_id, "u1");
    assert_eq!(fx.unread.get_all("u2").await.unwrap().get("u1"), Some(&1));
    assert!(!fx.unread.get_all("u2").await.unwrap().contains_key("mallory"));
}

#[tokio::test]
async fn dispatch_records_sender_activity() {
    let fx = Fixture::new();
    fx.dispatcher.submit(request("u1", "u2", "hi")).await.unwrap();
    assert!(fx.presence.last_activity("u1").await.unwrap().is_some());
}

/// Records how many cached entries the conversation had when each append ran.
struct CacheWatchingLog {
    inner: MemoryLog,
    store: SharedStore,
    cached_at_append: Mutex<Vec<usize>>,
}

#[async_trait]
impl DurableLog for CacheWatchingLog {
    async fn append(&self, topic: &str, key: &str, message: &Message) -> Result<(), LogError> {
        let cached = self.store.list_len(&format!("chat:{key}")).await.unwrap();
        self.cached_at_append.lock().await.push(cached);
        self.inner.append(topic, key, message).await
    }

    fn scan(&self, topic: &str, keys: &[String]) -> BoxStream<'static, Message> {
        self.inner.scan(topic, keys)
    }
}

#[tokio::test]
async fn append_happens_before_cache_update() {
    let store: SharedStore = Arc::new(MemoryStore::new());
    let watcher = Arc::new(CacheWatchingLog {
        inner: MemoryLog::new(),
        store: Arc::clone(&store),
        cached_at_append: Mutex::new(Vec::new()),
    });
    let fx = Fixture::build(
        Arc::clone(&store),
        Arc::clone(&watcher) as Arc<dyn DurableLog>,
        Arc::new(MemoryLog::new()),
    );

    for content in ["a", "b", "c"] {
        fx.dispatcher.submit(request("u2", "u1", content)).await.unwrap();
    }

    assert_eq!(*watcher.cached_at_append.lock().await, vec![0, 1, 2]);
    assert_eq!(fx.cache.len(&key("u1", "u2")).await.unwrap(), 3);
}
