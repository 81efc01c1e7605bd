//! Screener scraping: the fetch-and-extract side of the pipeline.
//!
//! Defines the two ports the worker drives:
//! - `PageFetcher`: produces downloadable extracts from the rendered page
//! - `BatchSink`: accepts a parsed batch (remote endpoint or in-process gateway)
//!
//! and provides:
//! - `worker`: the session-gated cycle loop with bounded retries
//! - `extract`: CSV extract parsing
//! - `downloads`: new/complete artifact detection in a download directory
//! - `webdriver`: a W3C WebDriver-backed `PageFetcher`
//! - `sink`: `BatchSink` implementations

pub mod downloads;
pub mod extract;
pub mod sink;
pub mod webdriver;
pub mod worker;

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{BatchReceipt, CycleError, RawRow};

/// Names present in the output location when a trigger was issued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline(pub HashSet<String>);

impl Baseline {
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }
}

/// A complete extract produced by the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
}

/// Abstraction over the browser session that renders the screener.
///
/// The worker owns its fetcher exclusively for the whole run; nothing else
/// touches the underlying session.
#[async_trait]
pub trait PageFetcher: Send {
    /// Record what already exists in the output location.
    async fn snapshot(&mut self) -> Result<Baseline>;

    /// Ask the page to produce a downloadable extract.
    /// Fails with `TriggerTimeout` if the control never becomes actionable.
    async fn trigger_extract(&mut self) -> Result<(), CycleError>;

    /// Wait up to `timeout` for a complete artifact absent from `baseline`.
    async fn poll_for_artifact(
        &mut self,
        baseline: &Baseline,
        timeout: Duration,
    ) -> Result<Option<Artifact>>;

    /// Read an artifact's text content.
    async fn read_artifact(&mut self, artifact: &Artifact) -> Result<String>;

    /// Tag an artifact so that no later cycle picks it up again.
    async fn mark_consumed(&mut self, artifact: &Artifact) -> Result<()>;

    /// Reload the page between cycles.
    async fn refresh(&mut self) -> Result<()>;

    /// Release the underlying session. Called exactly once, on every exit path.
    async fn close(&mut self) -> Result<()>;
}

/// Destination for parsed batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    async fn submit(&self, rows: &[RawRow]) -> Result<BatchReceipt>;
}
