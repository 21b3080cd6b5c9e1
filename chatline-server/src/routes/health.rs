use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Serialize;
use tracing::warn;

use crate::{app_state::AppState, db::bootstrap};

#[derive(Serialize)]
struct HealthResponse<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend: Option<&'a str>,
}

async fn healthz() -> impl IntoResponse {
    metrics::counter!("health_checks_total", "endpoint" => "healthz", "status" => "ok")
        .increment(1);
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            backend: None,
        }),
    )
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(pool) = state.pool.as_ref() else {
        metrics::counter!("health_checks_total", "endpoint" => "readyz", "status" => "ok")
            .increment(1);
        return (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ready",
                backend: Some("memory"),
            }),
        );
    };

    match bootstrap::ensure_readiness(pool).await {
        Ok(()) => {
            metrics::counter!("health_checks_total", "endpoint" => "readyz", "status" => "ok")
                .increment(1);
            (
                StatusCode::OK,
                Json(HealthResponse {
                    status: "ready",
                    backend: Some("postgres"),
                }),
            )
        }
        Err(err) => {
            warn!(error = %err, "readiness probe failed");
            metrics::counter!("health_checks_total", "endpoint" => "readyz", "status" => "error")
                .increment(1);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded",
                    backend: Some("postgres"),
                }),
            )
        }
    }
}

pub fn create_health_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
}
