use anyhow::Context;
use skillprint::api::{self, app_state::AppState};
use skillprint::config::{AppConfig, ConfigHandle, loader::ConfigLoader};
use skillprint::ingest::PayloadRegistry;
use skillprint::observability::init_tracing;
use skillprint::services::spawn_inactivity_sweeper;
use skillprint::storage::StorageFactory;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => ConfigLoader::load_from(path.clone()),
        None => ConfigLoader::load(),
    }
    .context("failed to load configuration")?;
    ConfigLoader::validate(&config).context("invalid configuration")?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path.as_ref())?;

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.workers.max(1))
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?
        .block_on(run(config, config_path))
}

async fn run(config: AppConfig, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let _log_guard = init_tracing(&config.app_name, &config.logging)
        .context("failed to initialize tracing")?;

    info!(
        "Starting {} ({} environment)...",
        config.app_name, config.environment
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let handle = Arc::new(match config_path {
        Some(path) => ConfigHandle::with_source(config, path),
        None => ConfigHandle::new(config),
    });
    info!("Configuration loaded successfully");

    let storage = StorageFactory::in_memory();
    info!("In-memory storage initialized");

    let app_state = AppState::new(handle.clone(), storage, PayloadRegistry::standard());
    info!("Application state created");

    let shutdown = app_state.shutdown.clone();
    let sweeper = spawn_inactivity_sweeper(app_state.ingestion.clone(), handle, shutdown.clone());

    let router = api::initialize_api(app_state).await?;
    info!("API router created with observability endpoints");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    sweeper.await.context("inactivity sweeper panicked")?;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
    }
    shutdown.cancel();
}
