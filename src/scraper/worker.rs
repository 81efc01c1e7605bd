//! Fetch-and-extract worker: the session-gated cycle loop.
//!
//! One cycle runs `TRIGGERING → AWAITING_COMPLETION → EXTRACTING →
//! SUBMITTING` and retries the whole sequence on any recoverable failure,
//! up to `max_attempts`. An exhausted cycle is logged and abandoned; the
//! loop always carries on to the next one. The page is refreshed after
//! every cycle and the fetcher is closed on every exit path.

use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use super::extract::parse_rows;
use super::{BatchSink, PageFetcher};
use crate::session::SessionWindow;
use crate::types::{BatchReceipt, CycleError};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub target_url: String,
    pub output_dir: PathBuf,
    pub session: SessionWindow,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub cycle_interval: Duration,
    pub off_session_sleep: Duration,
    pub completion_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            target_url: String::new(),
            output_dir: PathBuf::from("downloads"),
            session: SessionWindow::default(),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            cycle_interval: Duration::from_secs(60),
            off_session_sleep: crate::session::OFF_SESSION_SLEEP,
            completion_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleState {
    Idle,
    Triggering,
    AwaitingCompletion,
    Extracting,
    Submitting,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Succeeded { attempts: u32, receipt: BatchReceipt },
    Failed { attempts: u32, error: CycleError },
}

impl CycleOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CycleOutcome::Succeeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            CycleOutcome::Succeeded { attempts, .. } | CycleOutcome::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Snapshot of the worker, shared with the health reporter and dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub state: CycleState,
    pub in_session: bool,
    pub cycles_run: u64,
    pub consecutive_failures: u32,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for WorkerStatus {
    fn default() -> Self {
        Self {
            state: CycleState::Idle,
            in_session: false,
            cycles_run: 0,
            consecutive_failures: 0,
            last_cycle_at: None,
            last_success_at: None,
            last_error: None,
        }
    }
}

pub type StatusHandle = Arc<RwLock<WorkerStatus>>;

fn local_time() -> NaiveTime {
    chrono::Local::now().time()
}

pub struct ScrapeWorker<F: PageFetcher> {
    config: WorkerConfig,
    fetcher: F,
    sink: Arc<dyn BatchSink>,
    status: StatusHandle,
    clock: fn() -> NaiveTime,
}

impl<F: PageFetcher> ScrapeWorker<F> {
    pub fn new(config: WorkerConfig, fetcher: F, sink: Arc<dyn BatchSink>) -> Self {
        Self {
            config,
            fetcher,
            sink,
            status: Arc::new(RwLock::new(WorkerStatus::default())),
            clock: local_time,
        }
    }

    /// Replace the wall clock used for session gating.
    pub fn with_clock(mut self, clock: fn() -> NaiveTime) -> Self {
        self.clock = clock;
        self
    }

    pub fn status(&self) -> StatusHandle {
        self.status.clone()
    }

    async fn set_state(&self, state: CycleState) {
        debug!(?state, "Cycle state");
        self.status.write().await.state = state;
    }

    /// Run one cycle with bounded retries. Never panics and never
    /// propagates: failures are folded into the outcome.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let max = self.config.max_attempts.max(1);
        let mut attempt = 0;

        let outcome = loop {
            attempt += 1;
            match self.attempt().await {
                Ok(receipt) => break CycleOutcome::Succeeded { attempts: attempt, receipt },
                Err(e) if attempt >= max => break CycleOutcome::Failed { attempts: attempt, error: e },
                Err(e) => {
                    warn!(attempt, max_attempts = max, error = %e, "Cycle attempt failed, retrying");
                    self.set_state(CycleState::Idle).await;
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        };

        self.record(&outcome).await;

        if let Err(e) = self.fetcher.refresh().await {
            warn!(error = %e, "Page refresh failed");
        }
        outcome
    }

    async fn attempt(&mut self) -> Result<BatchReceipt, CycleError> {
        self.set_state(CycleState::Triggering).await;
        let baseline = self
            .fetcher
            .snapshot()
            .await
            .map_err(|e| CycleError::Fetcher(format!("{e:#}")))?;
        self.fetcher.trigger_extract().await?;

        self.set_state(CycleState::AwaitingCompletion).await;
        let timeout = self.config.completion_timeout;
        let artifact = self
            .fetcher
            .poll_for_artifact(&baseline, timeout)
            .await
            .map_err(|e| CycleError::Fetcher(format!("{e:#}")))?
            .ok_or(CycleError::ExtractionTimeout { waited_ms: timeout.as_millis() as u64 })?;

        self.set_state(CycleState::Extracting).await;
        let content = self
            .fetcher
            .read_artifact(&artifact)
            .await
            .map_err(|e| CycleError::ParseFailure(format!("{e:#}")))?;
        let rows = parse_rows(&content)?;
        debug!(artifact = %artifact.name, rows = rows.len(), "Extract parsed");

        self.set_state(CycleState::Submitting).await;
        let receipt = self
            .sink
            .submit(&rows)
            .await
            .map_err(|e| CycleError::SubmissionFailure(format!("{e:#}")))?;

        // A failed rename must not trigger a retry: the batch is already in.
        if let Err(e) = self.fetcher.mark_consumed(&artifact).await {
            error!(artifact = %artifact.name, error = %e, "Failed to mark artifact consumed");
        }
        Ok(receipt)
    }

    async fn record(&self, outcome: &CycleOutcome) {
        let now = Utc::now();
        let mut status = self.status.write().await;
        status.cycles_run += 1;
        status.last_cycle_at = Some(now);
        match outcome {
            CycleOutcome::Succeeded { attempts, receipt } => {
                status.state = CycleState::Succeeded;
                status.consecutive_failures = 0;
                status.last_success_at = Some(now);
                status.last_error = None;
                info!(attempts, rows = receipt.rows, batch = %receipt.timestamp, "Cycle succeeded");
            }
            CycleOutcome::Failed { attempts, error } => {
                status.state = CycleState::Failed;
                status.consecutive_failures += 1;
                status.last_error = Some(error.to_string());
                error!(
                    attempts,
                    consecutive = status.consecutive_failures,
                    error = %error,
                    "Cycle failed after exhausting retries"
                );
            }
        }
    }

    /// Sleep for `dur` unless a stop is signalled first. Returns true on stop.
    async fn pause(shutdown: &mut watch::Receiver<bool>, dur: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(dur) => false,
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        }
    }

    /// Run cycles until `shutdown` carries `true` (or its sender is dropped).
    /// The stop signal is honoured between cycles only.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            url = %self.config.target_url,
            output = %self.config.output_dir.display(),
            session = %self.config.session,
            interval_secs = self.config.cycle_interval.as_secs(),
            "Scrape worker started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let in_session = self.config.session.should_run_now((self.clock)());
            self.status.write().await.in_session = in_session;

            let wait = if in_session {
                self.run_cycle().await;
                self.config.cycle_interval
            } else {
                info!(
                    session = %self.config.session,
                    sleep_secs = self.config.off_session_sleep.as_secs(),
                    "Outside market session, sleeping"
                );
                self.config.off_session_sleep
            };

            if Self::pause(&mut shutdown, wait).await {
                break;
            }
        }

        info!("Scrape worker stopping");
        if let Err(e) = self.fetcher.close().await {
            error!(error = %e, "Failed to close page fetcher");
        }
    }
}
