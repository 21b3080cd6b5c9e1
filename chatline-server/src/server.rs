use app_state::AppState;
use axum::{Extension, Router, response::IntoResponse, routing::get, serve};
use routes::openapi::openapi_routes;
use shared::config::server::{Config, DurableLogConfig, LogBackend, LogFormat};
use sqlx::postgres::PgPoolOptions;
use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use crate::{
    app_state,
    db::bootstrap,
    handlers::live::ws_handler,
    middleware::request_context::{self, RequestIdState},
    routes,
    services::{DurableLog, MemoryLog, PgLog},
    store::MemoryStore,
    tracer,
};
use anyhow::Context;
use axum::http::{HeaderValue, StatusCode, header};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn metrics_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new().install_recorder().unwrap_or_else(|err| {
                warn!(error = %err, "global metrics recorder already set; /metrics will be empty");
                PrometheusBuilder::new().build_recorder().handle()
            });
            describe_metrics();
            handle
        })
        .clone()
}

fn describe_metrics() {
    metrics::describe_counter!(
        "chatline_messages_persisted_total",
        "Messages appended to the durable log"
    );
    metrics::describe_counter!(
        "chatline_delivery_total",
        "Dispatch outcomes by delivery result"
    );
    metrics::describe_counter!(
        "chatline_cache_errors_total",
        "Conversation cache failures by operation"
    );
    metrics::describe_counter!(
        "chatline_replay_total",
        "Durable log replays by completion"
    );
    metrics::describe_gauge!("chatline_live_connections", "Registered live channels");
}

async fn metrics_endpoint(Extension(handle): Extension<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        handle.render(),
    )
}

/// Initializes the tracing subscriber for logging using the provided configuration.
///
/// Returns the configured level. A subscriber that is already installed is left in place.
pub fn initialize_tracing(config: &Config) -> String {
    let env_filter = build_env_filter(config);

    let fmt_builder = fmt::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false);

    let installed = if matches!(config.logging.format, LogFormat::Json) {
        fmt_builder.json().with_ansi(false).try_init()
    } else {
        fmt_builder.with_ansi(true).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }

    config.logging.level.clone()
}

fn build_env_filter(config: &Config) -> EnvFilter {
    let default_level = config
        .logging
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}

/// Creates the connection pool behind the PostgreSQL durable log.
///
/// # Errors
/// Returns an error if no database URL is configured or the pool cannot connect.
pub async fn create_database_pool(log: &DurableLogConfig) -> anyhow::Result<sqlx::PgPool> {
    let url = log
        .database_url
        .as_deref()
        .context("durable_log.database_url is required for the postgres backend")?;
    let pool = PgPoolOptions::new()
        .max_connections(log.max_connections)
        .connect(url)
        .await
        .context("failed to connect to the durable log database")?;
    metrics::gauge!("db_pool_max_connections").set(f64::from(log.max_connections));
    Ok(pool)
}

/// Builds the application state for the configured durable log backend.
///
/// The postgres backend connects, creates the log schema and probes it before
/// any route is served.
///
/// # Errors
/// Returns an error if the database cannot be reached or bootstrapped.
pub async fn build_state(config: Arc<Config>) -> anyhow::Result<Arc<AppState>> {
    let store = Arc::new(MemoryStore::new());

    let (log, pool): (Arc<dyn DurableLog>, Option<sqlx::PgPool>) = match config.durable_log.backend
    {
        LogBackend::Memory => {
            info!("durable log: in-process");
            (Arc::new(MemoryLog::new()), None)
        }
        LogBackend::Postgres => {
            let pool = create_database_pool(&config.durable_log).await?;
            bootstrap::ensure_liveness(&pool)
                .await
                .context("database liveness check failed")?;
            bootstrap::run(&pool).await?;
            bootstrap::ensure_readiness(&pool)
                .await
                .context("database readiness check failed")?;
            info!("durable log: postgres");
            (
                Arc::new(PgLog::new(pool.clone(), config.durable_log.write_timeout())),
                Some(pool),
            )
        }
    };

    Ok(Arc::new(AppState::new(config, store, log, pool)))
}

/// Creates the CORS layer; an empty origin list allows any origin.
pub fn create_cors_layer(config: &Config) -> CorsLayer {
    use http::Method;

    let methods = vec![Method::GET, Method::POST, Method::OPTIONS];

    let mut cors = CorsLayer::new()
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::any())
        .allow_credentials(config.server.cors.allow_credentials)
        .max_age(Duration::from_secs(config.server.cors.max_age_seconds));

    if config.server.cors.allowed_origins.is_empty() {
        cors = cors.allow_origin(AllowOrigin::any());
    } else {
        let origins = config
            .server
            .cors
            .allowed_origins
            .iter()
            .filter_map(|origin| http::HeaderValue::from_str(origin).ok())
            .collect::<Vec<_>>();
        cors = cors.allow_origin(AllowOrigin::list(origins));
    }

    cors
}

/// Routes mounted under `/api`.
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new().merge(routes::messages::create_router_messages())
}

/// Creates the main application router with all middleware and routes.
pub fn create_app_router(
    state: Arc<AppState>,
    config: &Config,
    metrics_handle: PrometheusHandle,
) -> Router {
    let cors = create_cors_layer(config);
    let request_id_state = RequestIdState::from_config(config);

    Router::new()
        .nest("/api", create_api_router())
        .route("/ws", get(ws_handler))
        .merge(routes::health::create_health_router())
        .route("/metrics", get(metrics_endpoint))
        .merge(openapi_routes())
        .layer(Extension(metrics_handle))
        .layer(cors)
        .layer(tracer::create_trace_layer())
        .layer(axum::middleware::from_fn_with_state(
            request_id_state,
            request_context::assign_request_id,
        ))
        .with_state(state)
}

/// Resolves when the process receives CTRL+C.
pub async fn create_shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for CTRL+C; shutting down");
    }
    info!("Shutting down...");
}

/// Starts the server and serves until a shutdown signal arrives.
///
/// # Errors
/// Returns an error if the durable log cannot be set up or the listener fails.
pub async fn run(config: Config) -> anyhow::Result<()> {
    initialize_tracing(&config);
    info!(profile = %config.profile, "Starting server...");

    let metrics_handle = metrics_handle();
    let config = Arc::new(config);

    let state = build_state(Arc::clone(&config)).await?;
    let app = create_app_router(state, &config, metrics_handle);

    let listener = TcpListener::bind((config.server.host.as_str(), config.server.port))
        .await
        .with_context(|| {
            format!(
                "failed to bind {}:{}",
                config.server.host, config.server.port
            )
        })?;
    info!("Listening on {}", listener.local_addr()?);

    serve(listener, app)
        .with_graceful_shutdown(create_shutdown_signal())
        .await?;

    Ok(())
}
