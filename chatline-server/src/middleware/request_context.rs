use std::str::FromStr;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::http::error::{ApiError, AppResult};
use shared::config::server::Config;

/// Per-request data made available to handlers and the trace span.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub request_id: String,
}

#[derive(Clone, Debug)]
pub struct RequestIdState {
    header: HeaderName,
}

impl RequestIdState {
    pub fn from_config(config: &Config) -> Self {
        let header = HeaderName::from_str(&config.server.request_id_header)
            .unwrap_or_else(|_| HeaderName::from_static("x-request-id"));
        Self { header }
    }
}

/// Reuses the caller's request id or generates one, and echoes it on the response.
pub async fn assign_request_id(
    State(state): State<RequestIdState>,
    mut request: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let header_name = state.header.clone();
    let request_id =
        extract_request_id(request.headers(), &header_name).unwrap_or_else(|| Uuid::new_v4().to_string());
    let header_value = HeaderValue::from_str(&request_id)
        .map_err(|_| ApiError::internal_server_error("failed to encode request id"))?;

    request.extensions_mut().insert(RequestContext {
        request_id: request_id.clone(),
    });
    request
        .headers_mut()
        .insert(header_name.clone(), header_value.clone());

    let mut response = next.run(request).await;
    response.headers_mut().insert(header_name, header_value);

    Ok(response)
}

fn extract_request_id(headers: &HeaderMap, header: &HeaderName) -> Option<String> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Extension, Router, routing::get};
    use axum_test::TestServer;
    use shared::config::server::Profile;

    async fn echo(Extension(ctx): Extension<RequestContext>) -> String {
        ctx.request_id
    }

    fn server() -> TestServer {
        let config = Config::default_for_profile(Profile::Test);
        let app = Router::new().route("/", get(echo)).layer(
            axum::middleware::from_fn_with_state(
                RequestIdState::from_config(&config),
                assign_request_id,
            ),
        );
        TestServer::new(app).expect("test server")
    }

    #[tokio::test]
    async fn generates_request_id_when_absent() {
        let response = server().get("/").await;

        let id = response
            .headers()
            .get("x-request-id")
            .expect("request id header")
            .to_str()
            .unwrap()
            .to_string();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(response.text(), id);
    }

    #[tokio::test]
    async fn propagates_caller_request_id() {
        let response = server()
            .get("/")
            .add_header(
                HeaderName::from_static("x-request-id"),
                HeaderValue::from_static("req-42"),
            )
            .await;

        assert_eq!(response.headers().get("x-request-id").unwrap(), "req-42");
        assert_eq!(response.text(), "req-42");
    }

    #[test]
    fn invalid_configured_header_falls_back() {
        let mut config = Config::default_for_profile(Profile::Test);
        config.server.request_id_header = "bad header".into();
        let state = RequestIdState::from_config(&config);
        assert_eq!(state.header.as_str(), "x-request-id");
    }
}
