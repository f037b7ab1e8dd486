use axum::{extract::DefaultBodyLimit, middleware, routing::get, Router};
use domain::services::{CloudStorage, EventLogReader, EventLogWriter};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Config;
use crate::middleware::{metrics_handler, metrics_middleware, trace_id};
use crate::routes::{events, health, requests};
use crate::services::{DeliveryBackend, EngineSettings, ExportEngine};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<ExportEngine>,
    pub event_writer: Arc<dyn EventLogWriter>,
    /// Present when events live in PostgreSQL.
    pub pool: Option<PgPool>,
}

/// Wire the export engine from configuration and its collaborators.
pub fn build_engine(
    config: &Config,
    reader: Arc<dyn EventLogReader>,
    cloud: Arc<dyn CloudStorage>,
) -> Arc<ExportEngine> {
    let delivery = DeliveryBackend::new(config.export.artifact_dir.clone(), cloud);
    let settings = EngineSettings {
        retention: config.export.retention(),
        slow_job_threshold: config.export.slow_job_threshold(),
    };
    ExportEngine::new(reader, delivery, settings)
}

pub fn create_app(
    config: Config,
    engine: Arc<ExportEngine>,
    event_writer: Arc<dyn EventLogWriter>,
    pool: Option<PgPool>,
) -> Router {
    let config = Arc::new(config);

    let state = AppState {
        config: config.clone(),
        engine,
        event_writer,
        pool,
    };

    // Build CORS layer based on configuration
    let cors = if config.security.cors_origins.is_empty() {
        // Default: allow any origin (for development)
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        use tower_http::cors::AllowOrigin;
        let origins: Vec<_> = config
            .security
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods(Any)
            .allow_headers(Any)
    };

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/api/health", get(health::health_check))
        .route("/api/health/ready", get(health::ready))
        .route("/api/health/live", get(health::live))
        .route("/metrics", get(metrics_handler));

    Router::new()
        .merge(public_routes)
        .nest("/api/events", events::router())
        .nest("/api/requests", requests::router())
        // Global middleware (order matters: bottom layers run first)
        .layer(DefaultBodyLimit::max(config.server.max_body_size))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.request_timeout_secs,
        )))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_id))
        .layer(cors)
        .with_state(state)
}
