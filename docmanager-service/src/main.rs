use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod api;
mod config;
mod db;
mod embeddings;
mod error;
mod ingestion;
mod keywords;
mod ollama;
mod queue;
mod service;
mod status;
mod storage;
mod worker;

use crate::config::AppConfig;
use crate::db::Database;
use crate::ingestion::PdfiumTextExtractor;
use crate::ollama::OllamaClient;
use crate::queue::SqliteQueue;
use crate::service::DocManagerService;
use crate::storage::{LocalObjectStore, UrlSigner};
use crate::worker::{DocumentJob, EmbeddingJob, QueueWorker, TaggingJob};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!(
        "Starting Document Manager service v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Arc::new(AppConfig::load()?);
    info!(
        mode = ?config.mode,
        host = %config.server.host,
        port = config.server.port,
        "Configuration loaded"
    );

    let objects_dir = config.storage.objects_dir();
    std::fs::create_dir_all(&config.storage.data_dir)?;
    std::fs::create_dir_all(&objects_dir)?;

    let metrics = PrometheusBuilder::new().install_recorder()?;

    let db_path = config.storage.database_path();
    let db = Arc::new(Database::open(&db_path)?);
    info!(path = %db_path.display(), "Database initialized");

    let storage = Arc::new(LocalObjectStore::new(
        objects_dir,
        UrlSigner::new(&config.storage.signing_secret)?,
        config.server.public_base_url(),
    ));
    let queue = Arc::new(SqliteQueue::new(db.clone(), config.queue.clone()));
    let ollama = Arc::new(OllamaClient::new(
        config.ollama.clone(),
        &config.embeddings,
    )?);

    let service = Arc::new(DocManagerService::new(
        config.clone(),
        db,
        storage,
        queue,
        ollama.clone(),
        ollama,
        Arc::new(PdfiumTextExtractor),
    ));

    // Tags created while the embedding backend was down have no vector yet
    match service.backfill_tag_embeddings().await {
        Ok(count) if count > 0 => info!(count, "Backfilled tag embeddings"),
        Err(e) => warn!(error = %e, "Tag embedding backfill failed"),
        _ => {}
    }

    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    if config.mode.runs_workers() {
        let jobs: [(bool, usize, Arc<dyn DocumentJob>); 2] = [
            (
                config.workers.tagging.enabled,
                config.workers.tagging.concurrency,
                Arc::new(TaggingJob::new(service.clone())),
            ),
            (
                config.workers.embedding.enabled,
                config.workers.embedding.concurrency,
                Arc::new(EmbeddingJob::new(service.clone())),
            ),
        ];

        for (enabled, concurrency, job) in jobs {
            if !enabled {
                info!(worker = job.name(), "Worker disabled");
                continue;
            }
            info!(worker = job.name(), concurrency, "Starting worker");
            let worker = Arc::new(QueueWorker::new(service.clone(), job));
            handles.extend(worker.spawn(concurrency, shutdown.clone()));
        }
    }

    if config.mode.runs_api() {
        let app = api::router(service.clone(), Some(metrics));

        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("Listening on {}", addr);

        let token = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                wait_for_ctrl_c().await;
                token.cancel();
            })
            .await?;
    } else {
        wait_for_ctrl_c().await;
    }

    shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Worker task ended abnormally");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let format = fmt::format()
        .with_target(true)
        .with_thread_ids(true)
        .compact();

    // Use RUST_LOG if set, otherwise default to info level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docmanager_service=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().event_format(format))
        .with(filter)
        .init();
}
