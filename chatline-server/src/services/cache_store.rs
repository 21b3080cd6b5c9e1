use shared::models::{ConversationKey, Message};
use tracing::warn;

use crate::store::{SharedStore, StoreResult};

/// Bounded recent-history list per conversation, newest first.
#[derive(Clone)]
pub struct ConversationCache {
    store: SharedStore,
    capacity: usize,
}

impl std::fmt::Debug for ConversationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationCache")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

fn cache_key(key: &ConversationKey) -> String {
    format!("chat:{}", key.canonical())
}

impl ConversationCache {
    #[must_use]
    pub fn new(store: SharedStore, capacity: usize) -> Self {
        Self { store, capacity }
    }

    /// Records `message` as the newest entry, evicting the oldest beyond capacity.
    pub async fn push(&self, key: &ConversationKey, message: &Message) -> StoreResult<()> {
        let encoded = serde_json::to_string(message)?;
        self.store
            .list_push_front_capped(&cache_key(key), encoded, self.capacity)
            .await?;
        Ok(())
    }

    /// Up to `limit` of the newest cached messages, in ascending timestamp order.
    pub async fn range(&self, key: &ConversationKey, limit: usize) -> StoreResult<Vec<Message>> {
        let raw = self.store.list_range(&cache_key(key), limit).await?;
        let mut messages: Vec<Message> = raw
            .iter()
            .rev()
            .filter_map(|entry| match serde_json::from_str::<Message>(entry) {
                Ok(message) => Some(message),
                Err(err) => {
                    warn!(key = %key, error = %err, "dropping undecodable cache entry");
                    None
                }
            })
            .collect();
        messages.sort_by_key(|message| message.timestamp);
        Ok(messages)
    }

    /// Backfills an empty entry from replayed history (ascending order).
    ///
    /// Only the newest `capacity` messages are kept. Returns `false` without
    /// writing when the entry gained messages in the meantime.
    pub async fn populate_on_miss(
        &self,
        key: &ConversationKey,
        messages: &[Message],
    ) -> StoreResult<bool> {
        let newest_first = messages
            .iter()
            .rev()
            .take(self.capacity)
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        self.store
            .list_fill_if_empty(&cache_key(key), newest_first, self.capacity)
            .await
    }

    pub async fn len(&self, key: &ConversationKey) -> StoreResult<usize> {
        self.store.list_len(&cache_key(key)).await
    }
}
