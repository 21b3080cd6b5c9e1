use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use metrics::counter;
use shared::{
    config::server::HistoryConfig,
    models::{ConversationKey, HistoryQuery, KeyError, Message, check_identifier},
};
use tracing::{debug, instrument, warn};

use super::{
    cache_store::ConversationCache,
    durable_log::DurableLog,
    ingress::ValidationError,
    unread_ledger::UnreadLedger,
};

/// The read path: cache first, durable log replay on a miss.
#[derive(Clone)]
pub struct HistoryResolver {
    log: Arc<dyn DurableLog>,
    topic: String,
    replay_budget: Duration,
    cache: ConversationCache,
    unread: UnreadLedger,
    limits: HistoryConfig,
}

impl std::fmt::Debug for HistoryResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryResolver")
            .field("topic", &self.topic)
            .field("replay_budget", &self.replay_budget)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl HistoryResolver {
    #[must_use]
    pub fn new(
        log: Arc<dyn DurableLog>,
        topic: impl Into<String>,
        replay_budget: Duration,
        cache: ConversationCache,
        unread: UnreadLedger,
        limits: HistoryConfig,
    ) -> Self {
        Self {
            log,
            topic: topic.into(),
            replay_budget,
            cache,
            unread,
            limits,
        }
    }

    /// Returns up to `limit` of the newest messages between the two users in
    /// ascending timestamp order, and clears the requester's unread tally
    /// from the other participant.
    ///
    /// A cache failure or miss falls back to the durable log; a slow log
    /// yields partial (possibly empty) history rather than an error.
    ///
    /// # Errors
    /// Returns [`ValidationError`] if either identifier is empty or malformed.
    #[instrument(
        name = "chat.history",
        skip(self, query),
        fields(sender_id = %query.sender_id, receiver_id = %query.receiver_id),
        err
    )]
    pub async fn resolve(&self, query: &HistoryQuery) -> Result<Vec<Message>, ValidationError> {
        let key = conversation_key(query)?;
        let limit = self.limits.effective_limit(query.limit);

        let mut messages = match self.cache.range(&key, limit).await {
            Ok(cached) if !cached.is_empty() => cached,
            Ok(_) => self.replay(&key).await,
            Err(err) => {
                warn!(key = %key, error = %err, "cache read failed; replaying durable log");
                counter!("chatline_cache_errors_total", "op" => "range").increment(1);
                self.replay(&key).await
            }
        };

        messages.sort_by_key(|message| message.timestamp);
        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }

        if let Err(err) = self.unread.clear(&query.sender_id, &query.receiver_id).await {
            warn!(error = %err, "failed to clear unread tally");
        }

        Ok(messages)
    }

    async fn replay(&self, key: &ConversationKey) -> Vec<Message> {
        let mut replayed: Vec<Message> = self
            .log
            .replay(&self.topic, &key.replay_keys(), self.replay_budget)
            .collect()
            .await;
        replayed.sort_by_key(|message| message.timestamp);
        debug!(key = %key, count = replayed.len(), "replayed conversation from durable log");

        if !replayed.is_empty() {
            match self.cache.populate_on_miss(key, &replayed).await {
                Ok(true) => {}
                Ok(false) => debug!(key = %key, "cache repopulated concurrently; backfill skipped"),
                Err(err) => {
                    warn!(key = %key, error = %err, "failed to backfill conversation cache");
                    counter!("chatline_cache_errors_total", "op" => "backfill").increment(1);
                }
            }
        }

        replayed
    }
}

fn conversation_key(query: &HistoryQuery) -> Result<ConversationKey, ValidationError> {
    ConversationKey::new(&query.sender_id, &query.receiver_id).map_err(|source| {
        let field = if check_identifier(&query.sender_id).is_err() {
            "sender_id"
        } else {
            "receiver_id"
        };
        match source {
            KeyError::Empty => ValidationError::Missing(field),
            source => ValidationError::InvalidIdentifier { field, source },
        }
    })
}
