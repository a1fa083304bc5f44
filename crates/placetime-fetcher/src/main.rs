//! placetime-fetcher: polls feeds into items and finds an image for each.

mod config;

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use placetime_core::{Datastore, FeedSource};
use placetime_db::Database;
use placetime_jobs::adapters::http_client;
use placetime_jobs::{
    job_queue, preview_feed, HttpFeedSource, HttpImagePicker, JobContext, SalienceCropper,
    Scheduler, Shutdown, WorkerPool,
};

use crate::config::FetcherConfig;

const DEFAULT_LOG_FILTER: &str = "placetime_fetcher=info,placetime_jobs=info,placetime_db=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let _log_guard = init_logging();

    let config = FetcherConfig::from_env().context("invalid configuration")?;
    info!(
        workers = config.workers,
        queue_capacity = config.queue_capacity,
        feed_interval_secs = config.feed_interval_secs,
        image_interval_secs = config.image_interval_secs,
        image_batch_size = config.image_batch_size,
        drain_policy = %config.drain_policy,
        image_dir = %config.image_dir.display(),
        run_once = config.run_once,
        "Fetcher configured"
    );

    let client = http_client(config.request_timeout())?;
    let feeds: Arc<dyn FeedSource> = Arc::new(HttpFeedSource::new(client.clone()));

    if let Some(url) = config.debug_feed.as_deref() {
        return debug_feed(feeds.as_ref(), url).await;
    }

    check_image_dir(&config.image_dir)?;

    info!("Connecting to database...");
    let db = Database::connect_with_config(&config.database_url, config.pool_config())
        .await
        .context("failed to connect to database")?;
    info!("Running database migrations...");
    db.migrate().await.context("failed to run migrations")?;
    let datastore: Arc<dyn Datastore> = Arc::new(db);

    let ctx = JobContext::new(
        datastore.clone(),
        feeds,
        Arc::new(HttpImagePicker::new(client)),
        Arc::new(SalienceCropper::new()),
    )
    .with_image_dir(&config.image_dir);

    let shutdown = Shutdown::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.trigger();
        }
    });

    let (sender, receiver) = job_queue(config.queue_capacity);
    let pool = WorkerPool::new(config.worker_config(), receiver, ctx, shutdown.clone()).start();
    let scheduler = Scheduler::new(config.scheduler_config(), datastore, sender, shutdown.clone())?;

    if config.run_once {
        let report = scheduler.run_once().await;
        // Closing the queue lets the workers drain it and exit.
        drop(scheduler);
        pool.join().await;
        info!(
            feed_jobs = report.feed_jobs,
            image_jobs = report.image_jobs,
            "Single pass finished"
        );
        return Ok(());
    }

    scheduler.run().await;
    drop(scheduler);

    if !pool.join_with_timeout(config.shutdown_grace()).await {
        warn!(
            grace_secs = config.shutdown_grace_secs,
            "Exiting with jobs still in flight"
        );
    }
    info!("Fetcher stopped");
    Ok(())
}

/// Initialize tracing with configurable output.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_FILE    - path to log file (optional, enables file logging)
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter
fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());

    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let path = Path::new(path);
        let file_dir = path.parent().unwrap_or(Path::new("."));
        let file_name = path
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("placetime-fetcher.log");
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
            // No ANSI in files unless asked for.
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

/// Refuse to start unless the image directory exists.
fn check_image_dir(dir: &Path) -> anyhow::Result<()> {
    let metadata = match std::fs::metadata(dir) {
        Ok(metadata) => metadata,
        Err(e) => bail!("image directory {} is not accessible: {}", dir.display(), e),
    };
    if !metadata.is_dir() {
        bail!("image path {} is not a directory", dir.display());
    }
    Ok(())
}

/// Fetch one feed and log every entry with the id it would be stored under.
async fn debug_feed(feeds: &dyn FeedSource, url: &str) -> anyhow::Result<()> {
    let entries = preview_feed(feeds, url)
        .await
        .with_context(|| format!("failed to read feed {}", url))?;
    info!(url, entries = entries.len(), "Feed preview");
    for (id, entry) in entries {
        info!(
            item_id = %id,
            native_id = %entry.native_id,
            title = %entry.title,
            link = %entry.link,
            published = %entry.published,
            "Feed entry"
        );
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
