//! Mock browser for integration testing.
//!
//! Provides a deterministic `PageFetcher` that "downloads" scripted CSV
//! extracts into a real temporary directory when triggered, so artifact
//! detection, consumption and parsing all run against the filesystem.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use screener::scraper::downloads::DownloadDir;
use screener::scraper::{Artifact, Baseline, PageFetcher};
use screener::types::CycleError;

/// What the page does when the extract control is clicked.
#[derive(Debug, Clone)]
pub enum Step {
    /// Control never becomes clickable.
    NotClickable,
    /// Click works but the download never finishes.
    StuckDownload,
    /// Download completes with this CSV body.
    Csv(String),
}

#[derive(Debug, Default)]
pub struct BrowserLog {
    pub triggers: u32,
    pub refreshes: u32,
    pub closes: u32,
}

pub struct MockBrowser {
    downloads: DownloadDir,
    script: VecDeque<Step>,
    log: Arc<Mutex<BrowserLog>>,
}

impl MockBrowser {
    pub fn new(script: Vec<Step>) -> (Self, Arc<Mutex<BrowserLog>>) {
        let downloads = DownloadDir::new(temp_dir(), Duration::from_millis(5))
            .expect("temp download dir");
        let log = Arc::new(Mutex::new(BrowserLog::default()));
        let browser = Self { downloads, script: script.into(), log: log.clone() };
        (browser, log)
    }

    pub fn dir(&self) -> PathBuf {
        self.downloads.path().to_path_buf()
    }
}

pub fn temp_dir() -> PathBuf {
    let mut p = std::env::temp_dir();
    p.push(format!("screener_it_{}", Uuid::new_v4()));
    p
}

/// A screener export with the given `(symbol, %chg, price)` rows.
pub fn screener_csv(rows: &[(&str, &str, &str)]) -> String {
    let mut csv = String::from("Sr.,Stock Name,Symbol,Links,%Chg,Price,Volume\n");
    for (i, (symbol, pct, price)) in rows.iter().enumerate() {
        csv.push_str(&format!("{},{symbol} Ltd,{symbol},P&F | F.A,{pct},{price},10000\n", i + 1));
    }
    csv
}

#[async_trait]
impl PageFetcher for MockBrowser {
    async fn snapshot(&mut self) -> Result<Baseline> {
        self.downloads.snapshot()
    }

    async fn trigger_extract(&mut self) -> Result<(), CycleError> {
        self.log.lock().unwrap().triggers += 1;
        let name = format!("screener_{}.csv", Uuid::new_v4());
        match self.script.pop_front() {
            Some(Step::NotClickable) => Err(CycleError::TriggerTimeout { waited_ms: 5000 }),
            Some(Step::StuckDownload) => {
                std::fs::write(self.dir().join(format!("{name}.crdownload")), "partial")
                    .map_err(|e| CycleError::Fetcher(e.to_string()))
            }
            Some(Step::Csv(body)) => std::fs::write(self.dir().join(name), body)
                .map_err(|e| CycleError::Fetcher(e.to_string())),
            None => Err(CycleError::Fetcher("script exhausted".into())),
        }
    }

    async fn poll_for_artifact(
        &mut self,
        baseline: &Baseline,
        timeout: Duration,
    ) -> Result<Option<Artifact>> {
        self.downloads.wait_for_new(baseline, timeout).await
    }

    async fn read_artifact(&mut self, artifact: &Artifact) -> Result<String> {
        self.downloads.read(artifact).await
    }

    async fn mark_consumed(&mut self, artifact: &Artifact) -> Result<()> {
        self.downloads
            .mark_consumed(artifact, chrono::Local::now().naive_local())
            .map(|_| ())
    }

    async fn refresh(&mut self) -> Result<()> {
        self.log.lock().unwrap().refreshes += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.log.lock().unwrap().closes += 1;
        Ok(())
    }
}
