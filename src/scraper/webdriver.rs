//! Minimal W3C WebDriver client and the browser-backed `PageFetcher`.
//!
//! Talks JSON over HTTP to a running driver (chromedriver, geckodriver, or a
//! Selenium grid). Only the handful of commands the screener needs are
//! implemented: session lifecycle, navigation, element lookup by XPath,
//! visibility/enabled checks, click, and refresh.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::downloads::DownloadDir;
use super::{Artifact, Baseline, PageFetcher};
use crate::types::CycleError;

/// Key under which W3C drivers return element references.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Floor for a deadline-bounded request.
const MIN_REQUEST_TIME: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum WebDriverError {
    #[error("webdriver error '{error}': {message}")]
    Protocol { error: String, message: String },

    #[error("webdriver transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed webdriver response: {0}")]
    Malformed(String),
}

impl WebDriverError {
    fn is_no_such_element(&self) -> bool {
        matches!(self, WebDriverError::Protocol { error, .. } if error == "no such element")
    }

    fn is_timeout(&self) -> bool {
        matches!(self, WebDriverError::Transport(e) if e.is_timeout())
    }
}

/// Opaque element reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementId(pub String);

/// Unwrap the `{"value": ...}` envelope, turning error payloads into
/// `WebDriverError::Protocol`.
fn unwrap_value(success: bool, body: Value) -> Result<Value, WebDriverError> {
    let value = body
        .get("value")
        .cloned()
        .ok_or_else(|| WebDriverError::Malformed(body.to_string()))?;

    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Err(WebDriverError::Protocol { error: error.to_string(), message });
    }
    if !success {
        return Err(WebDriverError::Malformed(format!("error status without error payload: {value}")));
    }
    Ok(value)
}

fn element_id(value: &Value) -> Result<ElementId, WebDriverError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| ElementId(id.to_string()))
        .ok_or_else(|| WebDriverError::Malformed(format!("no element reference in {value}")))
}

/// Chrome capabilities that route downloads into `download_dir` without prompting.
pub fn chrome_capabilities(download_dir: &str, headless: bool) -> Value {
    let mut args = vec!["--no-sandbox", "--disable-dev-shm-usage", "--window-size=1920,1080"];
    if headless {
        args.push("--headless=new");
    }
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": {
                    "args": args,
                    "prefs": {
                        "download.default_directory": download_dir,
                        "download.prompt_for_download": false,
                        "download.directory_upgrade": true,
                        "safebrowsing.enabled": true
                    }
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct WebDriver {
    http: Client,
    base: String,
    session_id: String,
}

impl WebDriver {
    /// Open a new session on the driver at `base_url`.
    pub async fn start(base_url: &str, capabilities: Value) -> Result<Self, WebDriverError> {
        let http = Client::builder().timeout(Duration::from_secs(60)).build()?;
        let base = base_url.trim_end_matches('/').to_string();

        let resp = http.post(format!("{base}/session")).json(&capabilities).send().await?;
        let success = resp.status().is_success();
        let value = unwrap_value(success, resp.json().await?)?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| WebDriverError::Malformed(format!("no sessionId in {value}")))?
            .to_string();

        info!(session = %session_id, driver = %base, "WebDriver session started");
        Ok(Self { http, base, session_id })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, WebDriverError> {
        self.command_within(method, path, body, None).await
    }

    /// Like `command`, with a per-request timeout overriding the client's.
    async fn command_within(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        limit: Option<Duration>,
    ) -> Result<Value, WebDriverError> {
        let url = format!("{}/session/{}{}", self.base, self.session_id, path);
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        if let Some(limit) = limit {
            req = req.timeout(limit);
        }
        let resp = req.send().await?;
        let success = resp.status().is_success();
        unwrap_value(success, resp.json().await?)
    }

    pub async fn navigate(&self, url: &str) -> Result<(), WebDriverError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url }))).await?;
        Ok(())
    }

    /// Look up an element by XPath. A missing element is `None`, not an error.
    pub async fn find_xpath(&self, xpath: &str) -> Result<Option<ElementId>, WebDriverError> {
        self.find_xpath_within(xpath, None).await
    }

    async fn find_xpath_within(
        &self,
        xpath: &str,
        limit: Option<Duration>,
    ) -> Result<Option<ElementId>, WebDriverError> {
        let body = json!({ "using": "xpath", "value": xpath });
        match self.command_within(Method::POST, "/element", Some(body), limit).await {
            Ok(value) => element_id(&value).map(Some),
            Err(e) if e.is_no_such_element() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn element_flag(
        &self,
        el: &ElementId,
        flag: &str,
        limit: Option<Duration>,
    ) -> Result<bool, WebDriverError> {
        let value = self
            .command_within(Method::GET, &format!("/element/{}/{flag}", el.0), None, limit)
            .await?;
        value
            .as_bool()
            .ok_or_else(|| WebDriverError::Malformed(format!("{flag} returned {value}")))
    }

    pub async fn is_displayed(&self, el: &ElementId) -> Result<bool, WebDriverError> {
        self.element_flag(el, "displayed", None).await
    }

    pub async fn is_enabled(&self, el: &ElementId) -> Result<bool, WebDriverError> {
        self.element_flag(el, "enabled", None).await
    }

    pub async fn click(&self, el: &ElementId) -> Result<(), WebDriverError> {
        self.command(Method::POST, &format!("/element/{}/click", el.0), Some(json!({})))
            .await?;
        Ok(())
    }

    pub async fn refresh(&self) -> Result<(), WebDriverError> {
        self.command(Method::POST, "/refresh", Some(json!({}))).await?;
        Ok(())
    }

    /// Poll until the XPath resolves to a displayed, enabled element.
    /// Returns `None` once `timeout` has elapsed. Each lookup is limited to
    /// the time left before the deadline.
    pub async fn wait_until_clickable(
        &self,
        xpath: &str,
        timeout: Duration,
        poll: Duration,
    ) -> Result<Option<ElementId>, WebDriverError> {
        let deadline = Instant::now() + timeout;
        let remaining = || Some(deadline.saturating_duration_since(Instant::now()).max(MIN_REQUEST_TIME));
        loop {
            let found = match self.find_xpath_within(xpath, remaining()).await {
                Ok(found) => found,
                Err(e) if e.is_timeout() => {
                    debug!(xpath, "Element lookup timed out");
                    None
                }
                Err(e) => return Err(e),
            };
            if let Some(el) = found {
                // The element can go stale between lookup and check.
                let displayed = self.element_flag(&el, "displayed", remaining()).await;
                let enabled = self.element_flag(&el, "enabled", remaining()).await;
                let ready = match (displayed, enabled) {
                    (Ok(d), Ok(e)) => d && e,
                    (Err(e), _) | (_, Err(e)) => {
                        debug!(error = %e, "Element check failed, retrying");
                        false
                    }
                };
                if ready {
                    return Ok(Some(el));
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(poll.min(deadline - now)).await;
        }
    }

    /// End the session.
    pub async fn quit(self) -> Result<(), WebDriverError> {
        let url = format!("{}/session/{}", self.base, self.session_id);
        let resp = self.http.delete(&url).send().await?;
        let success = resp.status().is_success();
        unwrap_value(success, resp.json().await?)?;
        info!(session = %self.session_id, "WebDriver session closed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Browser-backed fetcher
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub target_url: String,
    pub download_dir: PathBuf,
    pub trigger_xpath: String,
    pub trigger_timeout: Duration,
    pub poll_interval: Duration,
    pub headless: bool,
}

pub struct BrowserFetcher {
    driver: Option<WebDriver>,
    downloads: DownloadDir,
    settings: BrowserSettings,
}

impl BrowserFetcher {
    /// Start a browser session and load the screener page.
    pub async fn launch(settings: BrowserSettings) -> Result<Self> {
        let downloads = DownloadDir::new(&settings.download_dir, settings.poll_interval)?;
        let dir = std::fs::canonicalize(downloads.path())
            .with_context(|| format!("Failed to resolve {}", downloads.path().display()))?;

        let caps = chrome_capabilities(&dir.to_string_lossy(), settings.headless);
        let driver = WebDriver::start(&settings.webdriver_url, caps)
            .await
            .context("Failed to start WebDriver session")?;
        if let Err(e) = driver.navigate(&settings.target_url).await {
            if let Err(quit) = driver.quit().await {
                warn!(error = %quit, "Failed to quit WebDriver session after navigation error");
            }
            return Err(e).with_context(|| format!("Failed to open {}", settings.target_url));
        }

        info!(url = %settings.target_url, downloads = %dir.display(), "Screener page loaded");
        Ok(Self { driver: Some(driver), downloads, settings })
    }

    fn driver(&self) -> Result<&WebDriver> {
        self.driver
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("browser session already closed"))
    }
}

#[async_trait]
impl PageFetcher for BrowserFetcher {
    async fn snapshot(&mut self) -> Result<Baseline> {
        self.downloads.snapshot()
    }

    async fn trigger_extract(&mut self) -> Result<(), CycleError> {
        let driver = self.driver().map_err(|e| CycleError::Fetcher(e.to_string()))?;
        let timeout = self.settings.trigger_timeout;

        let el = driver
            .wait_until_clickable(&self.settings.trigger_xpath, timeout, self.settings.poll_interval)
            .await
            .map_err(|e| CycleError::Fetcher(e.to_string()))?
            .ok_or(CycleError::TriggerTimeout { waited_ms: timeout.as_millis() as u64 })?;

        driver
            .click(&el)
            .await
            .map_err(|e| CycleError::Fetcher(e.to_string()))?;
        debug!(xpath = %self.settings.trigger_xpath, "Extract triggered");
        Ok(())
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
        self.driver()?.refresh().await.context("Page refresh failed")
    }

    async fn close(&mut self) -> Result<()> {
        match self.driver.take() {
            Some(driver) => driver.quit().await.context("Failed to quit WebDriver session"),
            None => {
                warn!("Browser session already closed");
                Ok(())
            }
        }
    }
}
