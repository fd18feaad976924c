use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use transcode_relay::app;
use transcode_relay::config::settings::{AppConfig, MediaBackend};
use transcode_relay::infrastructure::db::pool::connect_to_db;
use transcode_relay::infrastructure::runner::{JobRunner, MediaConvertRunner, MemoryRunner};
use transcode_relay::infrastructure::storage::{MediaStore, MemoryStore, S3Store};
use transcode_relay::modules::jobs::repository::{JobRepository, MemoryJobRepository, PgJobRepository};
use transcode_relay::state::AppState;
use transcode_relay::workers::reconciler::start_reconcile_worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    info!("Starting server...");

    let config = AppConfig::new().context("invalid configuration")?;

    let (store, runner): (Arc<dyn MediaStore>, Arc<dyn JobRunner>) = match config.media_backend {
        MediaBackend::Aws => (
            Arc::new(
                S3Store::new(&config.aws_region, &config.s3_bucket, config.s3_endpoint.as_deref()).await,
            ),
            Arc::new(
                MediaConvertRunner::new(&config.aws_region, config.mediaconvert_endpoint.as_deref()).await,
            ),
        ),
        MediaBackend::Memory => {
            warn!("Using in-memory store and runner, nothing will be transcoded");
            (Arc::new(MemoryStore::new(&config.s3_bucket)), Arc::new(MemoryRunner::new()))
        }
    };

    let repository: Arc<dyn JobRepository> = match &config.database_url {
        Some(url) => {
            let pool = connect_to_db(url).await.context("failed to connect to the registry database")?;
            Arc::new(PgJobRepository::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, registry is kept in memory");
            Arc::new(MemoryJobRepository::new())
        }
    };

    let port = config.server_port;
    let state = AppState::new(config, store, runner, repository);

    let worker = tokio::spawn(start_reconcile_worker(state.clone()));
    let app = app::create_app(state.clone());

    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server running on http://{}", addr);

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for the shutdown signal");
            }
            info!("Shutdown requested");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    state.shutdown.cancel();
    worker.await.context("reconcile worker panicked")?;
    info!("Server stopped");
    Ok(())
}
