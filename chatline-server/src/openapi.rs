#![allow(clippy::needless_for_each)] // Derive macro emits a for_each internally

use shared::models::{
    ContactHistoryQuery, Delivery, HistoryQuery, HistoryResponse, LiveEvent, Message, MessageType,
    SendMessageRequest, SendMessageResponse, Timestamp, UnreadQuery, UnreadResponse,
};
use utoipa::OpenApi;

use crate::http::problem::ProblemDetails;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Chatline API",
        version = "1.0.0",
        description = "Message dispatch, conversation history and unread tallies"
    ),
    paths(
        crate::handlers::messages::send_message,
        crate::handlers::messages::get_history,
        crate::handlers::messages::get_contact_history,
        crate::handlers::messages::get_unread,
    ),
    components(
        schemas(
            Message,
            MessageType,
            Timestamp,
            Delivery,
            SendMessageRequest,
            SendMessageResponse,
            HistoryQuery,
            ContactHistoryQuery,
            HistoryResponse,
            UnreadQuery,
            UnreadResponse,
            LiveEvent,
            ProblemDetails,
        )
    ),
    tags(
        (name = "Messages", description = "Message dispatch and history endpoints")
    )
)]
pub struct ApiDoc;
