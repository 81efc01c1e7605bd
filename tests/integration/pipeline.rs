//! End-to-end pipeline tests.
//!
//! Drives the real worker against the mock browser, submits through the
//! in-process gateway into both store adapters, and reads the derived
//! views back through the analytics engine.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use screener::analytics::AnalyticsEngine;
use screener::ingest::IngestionGateway;
use screener::scraper::worker::{CycleOutcome, ScrapeWorker, WorkerConfig};
use screener::storage::{MemoryStore, SqliteStore, StoragePort};
use screener::types::{CycleError, IngestError, RawRow};

use crate::mock_fetcher::{screener_csv, MockBrowser, Step};

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        retry_delay: Duration::from_millis(1),
        cycle_interval: Duration::from_millis(5),
        completion_timeout: Duration::from_millis(40),
        ..WorkerConfig::default()
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 23, 10, 0, 0).unwrap()
}

fn row(symbol: &str, pct: &str, price: &str) -> RawRow {
    RawRow::from_text(symbol, &format!("{symbol} Ltd"), pct, price, "10000", "P&F")
}

#[tokio::test]
async fn test_worker_retries_then_persists_once() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(IngestionGateway::new(store.clone()));
    let csv = screener_csv(&[("AAA", "6.2", "101.5"), ("BBB", "-1.25%", "55")]);
    let (browser, log) = MockBrowser::new(vec![
        Step::NotClickable,
        Step::StuckDownload,
        Step::Csv(csv),
    ]);
    let dir = browser.dir();

    let mut worker = ScrapeWorker::new(fast_config(), browser, gateway);
    let outcome = worker.run_cycle().await;

    match outcome {
        CycleOutcome::Succeeded { attempts, receipt } => {
            assert_eq!(attempts, 3);
            assert_eq!(receipt.rows, 2);
        }
        other => panic!("expected success, got {other:?}"),
    }
    assert_eq!(log.lock().unwrap().triggers, 3);
    assert_eq!(log.lock().unwrap().refreshes, 1);
    assert_eq!(store.len().await, 2);

    // The consumed artifact carries the consumed prefix.
    let names: Vec<String> = std::fs::read_dir(&dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().any(|n| n.starts_with("15_minutes_") && n.ends_with(".csv")));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_consumed_artifact_is_never_resubmitted() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(IngestionGateway::new(store.clone()));
    let csv = screener_csv(&[("AAA", "1", "10")]);
    let (browser, _log) = MockBrowser::new(vec![Step::Csv(csv), Step::StuckDownload]);
    let dir = browser.dir();
    let config = WorkerConfig { max_attempts: 1, ..fast_config() };

    let mut worker = ScrapeWorker::new(config, browser, gateway);
    assert!(worker.run_cycle().await.is_success());

    // The second cycle only sees the stuck download and the consumed file.
    let outcome = worker.run_cycle().await;
    assert!(matches!(
        outcome,
        CycleOutcome::Failed { error: CycleError::ExtractionTimeout { .. }, .. }
    ));
    assert_eq!(store.len().await, 1);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_exhausted_cycle_then_loop_recovers() {
    let store = Arc::new(MemoryStore::new());
    let gateway = Arc::new(IngestionGateway::new(store.clone()));
    let (browser, log) = MockBrowser::new(vec![
        Step::NotClickable,
        Step::NotClickable,
        Step::NotClickable,
        Step::Csv(screener_csv(&[("AAA", "2", "20")])),
    ]);
    let dir = browser.dir();

    let worker = ScrapeWorker::new(fast_config(), browser, gateway)
        .with_clock(|| chrono::NaiveTime::from_hms_opt(11, 0, 0).unwrap());
    let status = worker.status();
    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(worker.run(rx));

    while status.read().await.last_success_at.is_none() {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    tx.send(true).unwrap();
    handle.await.unwrap();

    let status = status.read().await.clone();
    assert!(status.cycles_run >= 2);
    assert_eq!(status.consecutive_failures, 0);
    assert_eq!(log.lock().unwrap().closes, 1);
    assert_eq!(store.len().await, 1);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_top_performers_needs_three_observations_in_the_hour() {
    let store = Arc::new(MemoryStore::new());
    let gateway = IngestionGateway::new(store.clone());
    let analytics = AnalyticsEngine::new(store.clone());

    gateway.ingest_at(&[row("AAA", "6.2", "101.5")], t0()).await.unwrap();
    gateway
        .ingest_at(&[row("AAA", "5.8", "102")], t0() + ChronoDuration::minutes(30))
        .await
        .unwrap();
    gateway
        .ingest_at(&[row("AAA", "6.0", "103")], t0() + ChronoDuration::minutes(50))
        .await
        .unwrap();

    // One hour on, the first observation has left the window.
    let now = t0() + ChronoDuration::hours(1);
    assert!(analytics.top_performers(now).await.unwrap().is_empty());

    gateway
        .ingest_at(&[row("AAA", "5.5", "104")], t0() + ChronoDuration::minutes(55))
        .await
        .unwrap();
    let top = analytics.top_performers(now).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].symbol, "AAA");
    assert_eq!(top[0].occurrences, 3);
    assert_eq!(top[0].avg_gain, dec!(5.77));
}

#[tokio::test]
async fn test_views_against_sqlite() {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let gateway = IngestionGateway::new(store.clone());
    let analytics = AnalyticsEngine::new(store.clone());

    // MOM: 25 positive flat-price observations. BRK: negative change, rising price.
    for i in 0..25 {
        let at = t0() + ChronoDuration::seconds(60 * i);
        let price = format!("{}", 100 + i);
        gateway
            .ingest_at(&[row("MOM", "1.5", "50"), row("BRK", "-0.5", &price)], at)
            .await
            .unwrap();
    }
    let now = t0() + ChronoDuration::minutes(25);

    let momentum = analytics.momentum(now).await.unwrap();
    assert_eq!(momentum.len(), 1);
    assert_eq!(momentum[0].symbol, "MOM");
    assert_eq!(momentum[0].appearances, 25);
    assert_eq!(momentum[0].volatility, dec!(0));

    let breakouts = analytics.breakouts(now).await.unwrap();
    assert!(breakouts.iter().all(|b| b.symbol != "MOM"));
    assert_eq!(breakouts[0].symbol, "BRK");

    let overview = analytics.overview(now).await.unwrap().unwrap();
    assert_eq!(overview.total_symbols, 2);
    assert_eq!(overview.total_volume, 20_000);

    let latest = store.latest_distinct().await.unwrap();
    assert!(latest.iter().all(|t| t.observed_at == t0() + ChronoDuration::minutes(24)));
}

#[tokio::test]
async fn test_empty_batch_stores_nothing() {
    let store = Arc::new(MemoryStore::new());
    let gateway = IngestionGateway::new(store.clone());

    assert!(matches!(gateway.ingest(&[]).await, Err(IngestError::EmptyBatch)));
    assert!(store.is_empty().await);
}
