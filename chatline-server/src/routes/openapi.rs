use std::sync::Arc;

use crate::{app_state::AppState, openapi::ApiDoc};
use axum::{Json, Router, routing::get};
use utoipa::OpenApi;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

pub fn openapi_routes() -> Router<Arc<AppState>> {
    Router::new().route("/openapi.json", get(openapi_json))
}
