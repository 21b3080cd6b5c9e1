pub mod api;
pub mod message;
pub mod timestamp;

pub use api::{
    ContactHistoryQuery, Delivery, HistoryQuery, HistoryResponse, LiveChannelQuery, LiveEvent,
    SendMessageRequest, SendMessageResponse, UnreadQuery, UnreadResponse,
};
pub use message::{ConversationKey, KEY_SEPARATOR, KeyError, Message, MessageType, check_identifier};
pub use timestamp::Timestamp;
