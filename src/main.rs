//! SCREENER: session-aware market screener scraper
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the tick store, serves the dashboard and runs the scrape worker
//! until Ctrl+C.

use anyhow::{Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use screener::config;
use screener::dashboard::{self, routes::DashboardState};
use screener::ingest::IngestionGateway;
use screener::scraper::sink::HttpSink;
use screener::scraper::webdriver::BrowserFetcher;
use screener::scraper::worker::ScrapeWorker;
use screener::scraper::BatchSink;
use screener::storage::{MemoryStore, SqliteStore, StoragePort};

const BANNER: &str = r#"
 ____   ____ ____  _____ _____ _   _ _____ ____
/ ___| / ___|  _ \| ____| ____| \ | | ____|  _ \
\___ \| |   | |_) |  _| |  _| |  \| |  _| | |_) |
 ___) | |___|  _ <| |___| |___| |\  | |___|  _ <
|____/ \____|_| \_\_____|_____|_| \_|_____|_| \_\

  Session-aware screener scraper + windowed analytics
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        target_url = %cfg.scraper.target_url,
        scraper = cfg.scraper.enabled,
        server = cfg.server.enabled,
        port = cfg.server.port,
        "SCREENER starting up"
    );

    // -- Storage ---------------------------------------------------------

    let store: Arc<dyn StoragePort> = match cfg.database_url() {
        Some(url) => {
            let store = SqliteStore::connect(&url)
                .await
                .with_context(|| format!("Failed to open tick store at {url}"))?;
            info!(url = %url, "SQLite tick store ready");
            Arc::new(store)
        }
        None => {
            warn!("No database_url configured; ticks are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };
    let gateway = Arc::new(IngestionGateway::new(store.clone()));

    // -- Scrape worker ---------------------------------------------------

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut worker_status = None;
    let mut worker_task = None;

    if cfg.scraper.enabled {
        let worker_cfg = cfg.scraper.worker_config()?;
        let sink: Arc<dyn BatchSink> = match &cfg.scraper.api_url {
            Some(url) => {
                let sink = HttpSink::new(url)?;
                info!(endpoint = %sink.endpoint(), "Submitting batches over HTTP");
                Arc::new(sink)
            }
            None => gateway.clone(),
        };

        let fetcher = BrowserFetcher::launch(cfg.scraper.browser_settings()).await?;
        let worker = ScrapeWorker::new(worker_cfg, fetcher, sink);
        worker_status = Some(worker.status());
        worker_task = Some(tokio::spawn(worker.run(shutdown_rx)));
    } else {
        info!("Scraper disabled; serving ingestion and analytics only");
    }

    // -- Dashboard -------------------------------------------------------

    let server_task = if cfg.server.enabled {
        let state = Arc::new(DashboardState::new(store.clone(), worker_status).with_gateway(gateway));
        let port = cfg.server.port;
        Some(tokio::spawn(async move {
            if let Err(e) = dashboard::serve(state, port).await {
                error!(error = %format!("{e:#}"), "Dashboard server stopped");
            }
        }))
    } else {
        None
    };

    // -- Wait for shutdown -----------------------------------------------

    info!("Running. Press Ctrl+C to stop.");
    run_until(tokio::signal::ctrl_c(), shutdown_tx, worker_task, server_task).await?;

    info!("SCREENER shut down cleanly.");
    Ok(())
}

/// Wait for `signal`, then stop the worker and the server. The worker is
/// signalled and awaited even when listening for the signal fails, so the
/// browser session is always closed.
async fn run_until<S>(
    signal: S,
    shutdown_tx: watch::Sender<bool>,
    worker_task: Option<JoinHandle<()>>,
    server_task: Option<JoinHandle<()>>,
) -> Result<()>
where
    S: Future<Output = std::io::Result<()>>,
{
    let signalled = signal.await;
    match &signalled {
        Ok(()) => info!("Shutdown signal received."),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal, stopping"),
    }

    let _ = shutdown_tx.send(true);
    if let Some(task) = worker_task {
        if let Err(e) = task.await {
            error!(error = %e, "Scrape worker task panicked");
        }
    }
    if let Some(task) = server_task {
        task.abort();
    }

    signalled.context("Failed to listen for shutdown signal")
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("screener=info"));

    let json_logging = std::env::var("SCREENER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
