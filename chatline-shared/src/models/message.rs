use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use utoipa::ToSchema;

use super::Timestamp;

/// Separator used inside conversation keys; user identifiers may not contain it.
pub const KEY_SEPARATOR: char = ':';

/// The kind of payload a message carries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Plain text.
    #[default]
    Text,
    /// Image reference.
    Image,
    /// File reference.
    File,
    /// Audio clip reference.
    Audio,
    /// Video clip reference.
    Video,
}

impl MessageType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::File => "file",
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

/// A chat message as recorded in the durable log and the recent-history cache.
///
/// The field names are the persisted representation; both stores read and
/// write exactly this JSON shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Message {
    /// Identifier of the sending user.
    pub sender_id: String,

    /// Display name of the sender at the time of sending.
    #[serde(default)]
    pub sender: String,

    /// Identifier of the receiving user.
    pub receiver_id: String,

    /// Message body.
    pub content: String,

    /// Server-assigned ingress time.
    pub timestamp: Timestamp,

    /// Payload kind.
    #[serde(default)]
    pub msg_type: MessageType,
}

impl Message {
    /// Canonical key of the conversation this message belongs to.
    ///
    /// # Errors
    /// Returns [`KeyError`] if either identifier is empty or contains the key separator.
    pub fn conversation_key(&self) -> Result<ConversationKey, KeyError> {
        ConversationKey::new(&self.sender_id, &self.receiver_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("user identifier must not be empty")]
    Empty,
    #[error("user identifier '{0}' must not contain '{KEY_SEPARATOR}'")]
    Separator(String),
}

/// Order-independent identifier of the conversation between two users.
///
/// The smaller identifier (byte-wise) always comes first, so `(a, b)` and
/// `(b, a)` produce the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    low: String,
    high: String,
}

impl ConversationKey {
    /// # Errors
    /// Returns [`KeyError`] if either identifier is empty or contains the key separator.
    pub fn new(a: &str, b: &str) -> Result<Self, KeyError> {
        check_identifier(a)?;
        check_identifier(b)?;
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Ok(Self {
            low: low.to_string(),
            high: high.to_string(),
        })
    }

    /// The canonical form, `low:high`. This is the only form ever written.
    #[must_use]
    pub fn canonical(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.low, self.high)
    }

    /// The reversed directed form, `high:low`, probed on replay for legacy writes.
    #[must_use]
    pub fn reversed(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.high, self.low)
    }

    /// Keys a replay must match: the canonical form first, then the reversed
    /// form when it differs (it does not for a self-conversation).
    #[must_use]
    pub fn replay_keys(&self) -> Vec<String> {
        let canonical = self.canonical();
        let reversed = self.reversed();
        if canonical == reversed {
            vec![canonical]
        } else {
            vec![canonical, reversed]
        }
    }
}

impl Display for ConversationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}{KEY_SEPARATOR}{}", self.low, self.high)
    }
}

/// Checks that a user identifier can take part in a conversation key.
///
/// # Errors
/// Returns [`KeyError`] if the identifier is empty or contains the key separator.
pub fn check_identifier(id: &str) -> Result<(), KeyError> {
    if id.trim().is_empty() {
        return Err(KeyError::Empty);
    }
    if id.contains(KEY_SEPARATOR) {
        return Err(KeyError::Separator(id.to_string()));
    }
    Ok(())
}
