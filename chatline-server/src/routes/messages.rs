use std::sync::Arc;

use crate::{
    app_state::AppState,
    handlers::{
        live::ws_handler,
        messages::{get_contact_history, get_history, get_unread, send_message},
    },
};
use axum::{Router, routing::get};
use tracing::info;

/// Message, unread and live-channel routes, mounted under `/api`.
pub fn create_router_messages() -> Router<Arc<AppState>> {
    info!("Creating messages router");
    Router::new()
        .route("/messages", get(get_history).post(send_message))
        .route("/messages/{contact_id}", get(get_contact_history))
        .route("/unread", get(get_unread))
        .route("/ws", get(ws_handler))
}
