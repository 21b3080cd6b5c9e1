use shared::models::{
    ConversationKey, KeyError, Message, SendMessageRequest, Timestamp, check_identifier,
};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("{field} is invalid: {source}")]
    InvalidIdentifier {
        field: &'static str,
        #[source]
        source: KeyError,
    },
}

fn identifier(field: &'static str, value: &str) -> Result<(), ValidationError> {
    match check_identifier(value) {
        Ok(()) => Ok(()),
        Err(KeyError::Empty) => Err(ValidationError::Missing(field)),
        Err(source) => Err(ValidationError::InvalidIdentifier { field, source }),
    }
}

/// Checks a message is routable and returns its conversation key.
///
/// # Errors
/// Returns [`ValidationError`] when an identifier is empty or malformed, or the
/// content is blank.
pub fn validate(message: &Message) -> Result<ConversationKey, ValidationError> {
    identifier("sender_id", &message.sender_id)?;
    identifier("receiver_id", &message.receiver_id)?;
    if message.content.trim().is_empty() {
        return Err(ValidationError::Missing("content"));
    }
    message.conversation_key().map_err(|source| {
        ValidationError::InvalidIdentifier {
            field: "receiver_id",
            source,
        }
    })
}

fn build(sender_id: String, request: SendMessageRequest) -> Result<Message, ValidationError> {
    let message = Message {
        sender_id,
        sender: request.sender.unwrap_or_default(),
        receiver_id: request.receiver_id,
        content: request.content,
        timestamp: Timestamp::now(),
        msg_type: request.msg_type.unwrap_or_default(),
    };
    validate(&message)?;
    Ok(message)
}

/// Turns an HTTP submission into a timestamped message.
///
/// # Errors
/// Returns [`ValidationError`] if the request is not routable.
pub fn normalize_request(request: SendMessageRequest) -> Result<Message, ValidationError> {
    let sender_id = request.sender_id.clone();
    build(sender_id, request)
}

/// Turns a live-channel frame into a timestamped message sent by `owner`.
///
/// A frame claiming another sender is not rejected; the owner replaces it.
///
/// # Errors
/// Returns [`ValidationError`] if the frame is not routable.
pub fn normalize_frame(owner: &str, request: SendMessageRequest) -> Result<Message, ValidationError> {
    if !request.sender_id.is_empty() && request.sender_id != owner {
        warn!(
            owner,
            claimed = %request.sender_id,
            "frame sender does not match channel owner; using owner"
        );
    }
    build(owner.to_string(), request)
}
