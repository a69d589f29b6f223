use crate::config::{load_config, Config};
use crate::ledger::Ledger;
use crate::pipeline::{job_queue, DirectoryWatcher, JobProcessor, PipelineError, WorkerPool};
use crate::report::{ReportTrigger, TextReportRenderer};
use crate::storage::duckdb::DuckDbStorage;
use crate::storage::traits::Storage;
use crate::web::run_server;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::parse::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::traits::StorageError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("web server error: {0}")]
    WebServer(String),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            eprintln!("Error: config not found");
            eprintln!("Searched locations:");
            eprintln!("  ~/.config/telemetry-ingest/config.yml");
            eprintln!("  /etc/telemetry-ingest/config.yml");
            eprintln!("\nUse --config <path> to specify a config file, or run 'telemetry-ingest config init' to generate one.");
            return Err("config not found".into());
        }
    };

    run_pipeline(&config_path).await.map_err(|e| e.into())
}

async fn run_pipeline(config_path: &Path) -> Result<(), RunError> {
    info!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(config_path)?;

    info!(path = %config.storage.path.display(), "Initializing storage");
    let storage: Arc<dyn Storage> = Arc::new(DuckDbStorage::new(&config.storage.path)?);

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal_cancel.cancel();
    });

    serve(config, storage, cancel).await
}

/// Create the output directories the pipeline writes into.
pub fn prepare_directories(config: &Config) -> Result<(), PipelineError> {
    let dirs = [
        config.watcher.input_dir.clone(),
        config.watcher.output_dir.clone(),
        config.watcher.archive_dir(),
        config.watcher.errors_dir(),
    ];
    for dir in dirs {
        std::fs::create_dir_all(&dir)
            .map_err(|source| PipelineError::CreateDir { path: dir, source })?;
    }
    Ok(())
}

/// Start workers, watcher, and web server against `storage` and run until
/// `cancel` fires or the web server fails.
///
/// Startup failures (schema, directories) return before any task is spawned.
pub async fn serve(
    config: Config,
    storage: Arc<dyn Storage>,
    cancel: CancellationToken,
) -> Result<(), RunError> {
    storage.init_schema().await?;
    prepare_directories(&config)?;

    let ledger = Ledger::new(storage.clone());
    ledger.recover().await?;

    let reports = if config.reports.enabled {
        let renderer = Arc::new(TextReportRenderer::new(&config.watcher.output_dir));
        Some(ReportTrigger::new(
            storage.clone(),
            renderer,
            config.reports.max_records,
        ))
    } else {
        info!("Report generation disabled");
        None
    };

    let processor = Arc::new(JobProcessor::new(
        storage.clone(),
        reports,
        config.watcher.archive_dir(),
        config.watcher.errors_dir(),
        config.pipeline.on_persistence_failure,
    ));

    let (queue_tx, queue_rx) = job_queue(config.watcher.queue_capacity);

    info!(workers = config.watcher.workers, "Starting worker pool");
    let pool = WorkerPool::new(processor, config.watcher.workers);
    let worker_handles = pool.spawn(queue_rx.clone(), cancel.clone());

    let watcher = DirectoryWatcher::new(
        &config.watcher.input_dir,
        &config.watcher.extension,
        config.watcher.poll_interval,
        ledger.clone(),
        queue_tx,
    );
    let watcher_handle = tokio::spawn(watcher.run(cancel.clone()));

    info!("Starting web server on {}", config.web.listen);
    let mut web_handle = tokio::spawn(run_server(
        storage.clone(),
        config.web.clone(),
        cancel.clone(),
    ));

    info!("Pipeline started, press Ctrl+C to shutdown");

    let web_result = tokio::select! {
        _ = cancel.cancelled() => web_handle.await,
        result = &mut web_handle => {
            cancel.cancel();
            result
        }
    };

    info!("Waiting for pipeline tasks to complete");

    if let Err(e) = watcher_handle.await {
        error!(error = %e, "Watcher task join error");
    }
    for handle in worker_handles {
        if let Err(e) = handle.await {
            error!(error = %e, "Worker task join error");
        }
    }

    // Jobs still queued were claimed but never started
    for job in queue_rx.drain().await {
        warn!(file_name = %job.file_name, "Releasing unstarted job");
        if let Err(e) = ledger.release(&job.file_name).await {
            error!(file_name = %job.file_name, error = %e, "Failed to release claim");
        }
    }

    match web_result {
        Ok(Ok(())) => info!("Web server stopped"),
        Ok(Err(e)) => return Err(RunError::WebServer(e.to_string())),
        Err(e) => return Err(e.into()),
    }

    info!("Pipeline shutdown complete");
    Ok(())
}
