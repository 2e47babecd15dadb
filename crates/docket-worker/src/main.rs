//! docketd: runs the document processing pipeline until SIGINT or SIGTERM.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use docket_core::defaults;
use docket_core::{DocumentMessages, DocumentRepository, NoOpSummarizer, Shutdown, TaskRepository};
use docket_db::{
    log_pool_metrics, Database, FilesystemBackend, MemoryDocumentRepository, MemoryTaskRepository,
};
use docket_jobs::{
    spawn_maintenance, spawn_trash_purge, subscribe_summarization, AnalyzerRegistry, Archive,
    DocumentTaskProcessor, EnginePool, EnginePoolConfig, PdfAnalyzer, PdfiumEngine,
    PreviewConfig, Scheduler, SummarizeProcessor, WorkerConfig,
};

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables daily-rotated file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: info for the docket crates)
fn init_logging() -> Option<WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "docket_core=info,docket_db=info,docket_jobs=info,docketd=info".into()
    });

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("docketd.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            // no ANSI in files unless asked for
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(log_ansi.unwrap_or(false));
            registry.with(layer).init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            let mut layer = tracing_subscriber::fmt::layer();
            if let Some(ansi) = log_ansi {
                layer = layer.with_ansi(ansi);
            }
            registry.with(layer).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Settings read once at startup.
struct Settings {
    max_attempts: i32,
    retention_interval: Duration,
    trash_purge_interval: Duration,
    trash_retention_days: i64,
    data_dir: String,
    library_path: Option<PathBuf>,
}

impl Settings {
    fn from_env() -> Self {
        Self {
            max_attempts: env_or("TASK_MAX_ATTEMPTS", defaults::TASK_MAX_ATTEMPTS).max(1),
            retention_interval: Duration::from_secs(
                env_or(
                    "TASK_RETENTION_INTERVAL_SECS",
                    defaults::STORE_MAINTENANCE_INTERVAL_SECS,
                )
                .max(1),
            ),
            trash_purge_interval: Duration::from_secs(
                env_or("TRASH_PURGE_INTERVAL_SECS", defaults::TRASH_PURGE_INTERVAL_SECS).max(1),
            ),
            trash_retention_days: env_or("TRASH_RETENTION_DAYS", defaults::TRASH_RETENTION_DAYS)
                .max(0),
            data_dir: std::env::var("DOCKET_DATA_DIR").unwrap_or_else(|_| "./data".to_string()),
            library_path: std::env::var("PDFIUM_LIBRARY_PATH").ok().map(PathBuf::from),
        }
    }
}

/// Bind the stores, start every worker and background job.
///
/// Resources acquired here register their close callbacks on the scheduler's
/// shutdown, so a failure part way through is cleaned up by running it.
async fn start_pipeline(
    scheduler: &Arc<Scheduler>,
    tasks: Arc<dyn TaskRepository>,
    documents: Arc<dyn DocumentRepository>,
    settings: &Settings,
) -> anyhow::Result<()> {
    let shutdown = scheduler.shutdown().clone();
    scheduler.attach_store(tasks.clone())?;
    spawn_maintenance(scheduler, tasks, settings.retention_interval);

    // Blob storage
    let storage = FilesystemBackend::new(&settings.data_dir);
    storage
        .validate()
        .await
        .with_context(|| format!("data directory {} is not usable", settings.data_dir))?;
    let storage = Arc::new(storage);

    // PDF engine pool
    let engines = EnginePool::new(
        EnginePoolConfig::from_env(),
        PdfiumEngine::factory(settings.library_path.clone()),
    )
    .await
    .context("failed to start the PDF engine pool")?;
    let closing = engines.clone();
    shutdown.register_callback("pdf-engine-pool", move || async move { closing.close() });

    let mut analyzers = AnalyzerRegistry::new();
    analyzers.register(Arc::new(PdfAnalyzer::new(
        engines,
        storage.clone(),
        PreviewConfig::from_env(),
    )));

    // Processors and chaining
    let messages = Arc::new(DocumentMessages::new());
    scheduler.register_worker(Arc::new(DocumentTaskProcessor::new(
        documents.clone(),
        Arc::new(analyzers),
        messages.clone(),
    )))?;
    scheduler.register_worker(Arc::new(SummarizeProcessor::new(
        documents.clone(),
        Arc::new(NoOpSummarizer),
    )))?;
    subscribe_summarization(&messages, scheduler.clone(), settings.max_attempts);
    info!("No search index configured, indexing stage not started");

    // Trash
    let archive = Archive::new(documents, storage, scheduler.clone(), messages)
        .with_max_attempts(settings.max_attempts)
        .with_trash_retention(chrono::Duration::days(settings.trash_retention_days));
    spawn_trash_purge(scheduler, Arc::new(archive), settings.trash_purge_interval);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_logging();

    let settings = Settings::from_env();
    let shutdown = Arc::new(Shutdown::new());
    let scheduler = Arc::new(Scheduler::new(shutdown.clone(), WorkerConfig::from_env()));

    // Stores
    let (tasks, documents): (Arc<dyn TaskRepository>, Arc<dyn DocumentRepository>) =
        match std::env::var("DATABASE_URL") {
            Ok(url) => {
                let db = Database::connect(&url)
                    .await
                    .context("failed to connect to PostgreSQL")?;
                let stores = (
                    db.tasks.clone() as Arc<dyn TaskRepository>,
                    db.documents.clone() as Arc<dyn DocumentRepository>,
                );
                let migrated = db.migrate().await;
                log_pool_metrics(&db.pool);
                shutdown.register_callback("database", move || async move { db.close().await });
                if let Err(e) = migrated {
                    shutdown.execute().await;
                    return Err(anyhow::Error::new(e).context("failed to run migrations"));
                }
                stores
            }
            Err(_) => {
                warn!("DATABASE_URL not set, tasks and documents are kept in memory");
                (
                    Arc::new(MemoryTaskRepository::new()) as Arc<dyn TaskRepository>,
                    Arc::new(MemoryDocumentRepository::new()) as Arc<dyn DocumentRepository>,
                )
            }
        };

    if let Err(e) = start_pipeline(&scheduler, tasks, documents, &settings).await {
        error!(error = %e, "Startup failed, releasing resources");
        shutdown.execute().await;
        return Err(e);
    }

    info!(
        data_dir = %settings.data_dir,
        max_attempts = settings.max_attempts,
        retention_interval_secs = settings.retention_interval.as_secs(),
        trash_retention_days = settings.trash_retention_days,
        "docketd started"
    );

    shutdown_signal().await;
    info!("Shutting down");
    shutdown.execute().await;
    info!("Shutdown complete");
    Ok(())
}
