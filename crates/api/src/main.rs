use anyhow::{Context, Result};
use audit_export_api::{app, config, jobs, middleware, services};
use domain::services::{
    CloudStorage, EventLogReader, EventLogWriter, InMemoryEventLog, InMemoryObjectStore,
};
use persistence::repositories::AuditEventRepository;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = config::Config::load()?;

    middleware::logging::init_logging(&config.logging)?;
    middleware::init_metrics()?;

    info!("Starting audit export service v{}", env!("CARGO_PKG_VERSION"));

    let (reader, writer, pool) = if config.uses_database() {
        let pool = persistence::db::create_pool(&(&config.database).into()).await?;

        info!("Running database migrations...");
        sqlx::migrate!("../persistence/src/migrations")
            .run(&pool)
            .await?;
        info!("Migrations completed");

        let repository = Arc::new(AuditEventRepository::new(pool.clone()));
        let reader: Arc<dyn EventLogReader> = repository.clone();
        let writer: Arc<dyn EventLogWriter> = repository;
        (reader, writer, Some(pool))
    } else {
        warn!("No database configured, using the in-memory event log");
        let log = Arc::new(InMemoryEventLog::new());
        let reader: Arc<dyn EventLogReader> = log.clone();
        let writer: Arc<dyn EventLogWriter> = log;
        (reader, writer, None)
    };

    let cloud: Arc<dyn CloudStorage> = match config.cloud_storage.provider.as_str() {
        "http" => Arc::new(services::HttpObjectStore::new(&config.cloud_storage)?),
        _ => {
            warn!("Using the in-memory object store for cloud exports");
            Arc::new(InMemoryObjectStore::new())
        }
    };

    let engine = app::build_engine(&config, reader, cloud);

    let mut scheduler = jobs::JobScheduler::new();
    scheduler.register(jobs::ExportSweepJob::new(
        engine.clone(),
        config.export.sweep_interval_secs,
    ));
    scheduler.start();

    let addr = config
        .socket_addr()
        .context("invalid server.host / server.port")?;
    let app = app::create_app(config, engine, writer, pool);

    info!("Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown();
    scheduler.wait_for_shutdown(Duration::from_secs(10)).await;
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
