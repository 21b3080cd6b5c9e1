use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use shared::models::{
    ContactHistoryQuery, HistoryQuery, HistoryResponse, SendMessageRequest, SendMessageResponse,
    UnreadQuery, UnreadResponse, check_identifier,
};
use serde_json::json;
use tracing::instrument;

use crate::{
    app_state::AppState,
    http::{
        error::{ApiError, AppResult},
        problem::ProblemDetails,
    },
};

/// Accepts a message, persists it and delivers it live or tallies it unread.
#[utoipa::path(
    post,
    path = "/api/messages",
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Message persisted", body = SendMessageResponse),
        (status = 400, description = "Invalid message", body = ProblemDetails),
        (status = 503, description = "Durable log unavailable", body = ProblemDetails)
    ),
    tag = "Messages"
)]
#[instrument(name = "http.send_message", skip(state, request))]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendMessageRequest>,
) -> AppResult<Json<SendMessageResponse>> {
    let receipt = state.dispatcher.submit(request).await?;
    Ok(Json(SendMessageResponse {
        message: receipt.message,
        delivery: receipt.delivery,
    }))
}

/// Conversation history between `sender_id` and `receiver_id`, oldest first.
///
/// Clears the sender's unread tally from the receiver.
#[utoipa::path(
    get,
    path = "/api/messages",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Conversation history", body = HistoryResponse),
        (status = 400, description = "Invalid participants", body = ProblemDetails)
    ),
    tag = "Messages"
)]
#[instrument(name = "http.history", skip(state, query))]
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<HistoryResponse>> {
    let messages = state.history.resolve(&query).await?;
    Ok(Json(HistoryResponse { messages }))
}

/// Same as [`get_history`] with the other participant taken from the path.
#[utoipa::path(
    get,
    path = "/api/messages/{contact_id}",
    params(
        ("contact_id" = String, Path, description = "The other participant"),
        ContactHistoryQuery
    ),
    responses(
        (status = 200, description = "Conversation history", body = HistoryResponse),
        (status = 400, description = "Invalid participants", body = ProblemDetails)
    ),
    tag = "Messages"
)]
pub async fn get_contact_history(
    State(state): State<Arc<AppState>>,
    Path(contact_id): Path<String>,
    Query(query): Query<ContactHistoryQuery>,
) -> AppResult<Json<HistoryResponse>> {
    let query = query.into_history(contact_id);
    let messages = state.history.resolve(&query).await?;
    Ok(Json(HistoryResponse { messages }))
}

/// Unread tallies of `user_id`, keyed by sender.
#[utoipa::path(
    get,
    path = "/api/unread",
    params(UnreadQuery),
    responses(
        (status = 200, description = "Unread tallies", body = UnreadResponse),
        (status = 400, description = "Invalid user", body = ProblemDetails),
        (status = 503, description = "Store unavailable", body = ProblemDetails)
    ),
    tag = "Messages"
)]
#[instrument(name = "http.unread", skip(state, query), fields(user_id = %query.user_id))]
pub async fn get_unread(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UnreadQuery>,
) -> AppResult<Json<UnreadResponse>> {
    check_identifier(&query.user_id).map_err(|err| {
        ApiError::validation(format!("user_id: {err}")).with_details(json!({ "field": "user_id" }))
    })?;
    let counts = state.unread.get_all(&query.user_id).await?;
    Ok(Json(UnreadResponse {
        user_id: query.user_id,
        counts,
    }))
}
