use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};

use super::{Message, MessageType};

/// Body of `POST /api/messages` and of every client frame on the live channel.
///
/// On the live channel `sender_id` may be omitted; the channel owner is always used.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub sender: Option<String>,
    pub receiver_id: String,
    pub content: String,
    #[serde(default)]
    pub msg_type: Option<MessageType>,
}

/// What happened to a message after it was persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delivery {
    /// The receiver was online; `delivered` reports whether the frame was queued.
    Live { delivered: bool },
    /// The receiver was offline; `count` is their unread tally from this sender.
    Unread { count: i64 },
    /// The receiver was offline and the unread tally could not be updated.
    Unrecorded,
}

impl Delivery {
    /// Label used for the delivery outcome metric.
    #[must_use]
    pub const fn outcome(&self) -> &'static str {
        match self {
            Self::Live { delivered: true } => "live",
            Self::Live { delivered: false } => "live_dropped",
            Self::Unread { .. } => "unread",
            Self::Unrecorded => "unrecorded",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SendMessageResponse {
    pub message: Message,
    pub delivery: Delivery,
}

/// Query of `GET /api/messages`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// The requesting user; their unread tally from `receiver_id` is cleared.
    #[serde(default)]
    pub sender_id: String,
    /// The other participant.
    #[serde(default)]
    pub receiver_id: String,
    /// Maximum number of messages to return (default 20).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Query of `GET /api/messages/{contact_id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ContactHistoryQuery {
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ContactHistoryQuery {
    #[must_use]
    pub fn into_history(self, contact_id: String) -> HistoryQuery {
        HistoryQuery {
            sender_id: self.sender_id,
            receiver_id: contact_id,
            limit: self.limit,
        }
    }
}

/// Messages of one conversation in ascending timestamp order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct HistoryResponse {
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct UnreadQuery {
    #[serde(default)]
    pub user_id: String,
}

/// Unread tallies of one user keyed by sender.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct UnreadResponse {
    pub user_id: String,
    pub counts: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LiveChannelQuery {
    #[serde(default)]
    pub user_id: String,
}

/// Server to client frame on the live channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    /// A message addressed to the channel owner.
    Message { message: Message },
    /// Receipt for a message the channel owner submitted.
    Ack {
        message: Message,
        delivery: Delivery,
    },
    /// A submitted frame was rejected or could not be persisted.
    Error { code: String, message: String },
}

impl LiveEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}
