use std::sync::Arc;

use metrics::counter;
use shared::models::{Delivery, LiveEvent, Message, SendMessageRequest};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use super::{
    cache_store::ConversationCache,
    connection_registry::ConnectionRegistry,
    durable_log::{DurableLog, LogError},
    ingress::{self, ValidationError},
    presence::Presence,
    unread_ledger::UnreadLedger,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),
    #[error("message was not persisted: {0}")]
    Persistence(#[from] LogError),
}

impl DispatchError {
    /// Stable machine-readable code shared by HTTP problems and live error frames.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failed",
            Self::Persistence(_) => "persistence_failed",
        }
    }
}

/// Outcome of a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub message: Message,
    pub delivery: Delivery,
}

/// The write path: validate, persist, cache, then deliver live or tally unread.
#[derive(Clone)]
pub struct Dispatcher {
    log: Arc<dyn DurableLog>,
    topic: String,
    cache: ConversationCache,
    presence: Presence,
    registry: Arc<ConnectionRegistry>,
    unread: UnreadLedger,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        log: Arc<dyn DurableLog>,
        topic: impl Into<String>,
        cache: ConversationCache,
        presence: Presence,
        registry: Arc<ConnectionRegistry>,
        unread: UnreadLedger,
    ) -> Self {
        Self {
            log,
            topic: topic.into(),
            cache,
            presence,
            registry,
            unread,
        }
    }

    /// Dispatches an HTTP submission.
    ///
    /// # Errors
    /// See [`Dispatcher::dispatch`].
    pub async fn submit(&self, request: SendMessageRequest) -> Result<DispatchReceipt, DispatchError> {
        let message = ingress::normalize_request(request)?;
        self.dispatch(message).await
    }

    /// Dispatches a live-channel frame on behalf of the channel owner.
    ///
    /// # Errors
    /// See [`Dispatcher::dispatch`].
    pub async fn submit_frame(
        &self,
        owner: &str,
        request: SendMessageRequest,
    ) -> Result<DispatchReceipt, DispatchError> {
        let message = ingress::normalize_frame(owner, request)?;
        self.dispatch(message).await
    }

    /// Runs a normalized message through the write path.
    ///
    /// Nothing downstream of the durable log runs unless the append succeeded.
    /// Cache and unread failures are logged and do not fail the dispatch.
    ///
    /// # Errors
    /// [`DispatchError::Validation`] before any side effect, or
    /// [`DispatchError::Persistence`] when the append fails.
    #[instrument(
        name = "chat.dispatch",
        skip(self, message),
        fields(sender_id = %message.sender_id, receiver_id = %message.receiver_id),
        err
    )]
    pub async fn dispatch(&self, message: Message) -> Result<DispatchReceipt, DispatchError> {
        let key = ingress::validate(&message)?;
        let canonical = key.canonical();

        self.log.append(&self.topic, &canonical, &message).await?;
        counter!("chatline_messages_persisted_total").increment(1);

        if let Err(err) = self.cache.push(&key, &message).await {
            warn!(key = %canonical, error = %err, "failed to update conversation cache");
            counter!("chatline_cache_errors_total", "op" => "push").increment(1);
        }

        let delivery = self.deliver_or_tally(&message).await;
        counter!("chatline_delivery_total", "outcome" => delivery.outcome()).increment(1);

        self.presence.touch_activity(&message.sender_id).await;

        Ok(DispatchReceipt { message, delivery })
    }

    async fn deliver_or_tally(&self, message: &Message) -> Delivery {
        let receiver = message.receiver_id.as_str();

        let online = match self.presence.is_online(receiver).await {
            Ok(online) => online,
            Err(err) => {
                warn!(receiver, error = %err, "presence lookup failed; treating receiver as offline");
                false
            }
        };

        if online {
            let delivered = self
                .registry
                .send(
                    receiver,
                    LiveEvent::Message {
                        message: message.clone(),
                    },
                )
                .await;
            if !delivered {
                debug!(receiver, "receiver online but live queue unavailable; frame dropped");
            }
            return Delivery::Live { delivered };
        }

        match self.unread.increment(receiver, &message.sender_id).await {
            Ok(count) => Delivery::Unread { count },
            Err(err) => {
                warn!(receiver, error = %err, "failed to record unread message");
                Delivery::Unrecorded
            }
        }
    }
}
