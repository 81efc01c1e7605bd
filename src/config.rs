//! Configuration loading from TOML with environment overrides.
//!
//! Reads `config.toml` into strongly-typed structs. Every scraper field has
//! a default, so a minimal file only needs `target_url`. The database URL
//! can be overridden with `DATABASE_URL` (typically from `.env`).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::scraper::webdriver::BrowserSettings;
use crate::scraper::worker::WorkerConfig;
use crate::session::SessionWindow;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ScraperConfig {
    pub enabled: bool,
    pub target_url: String,
    pub webdriver_url: String,
    pub headless: bool,
    pub output_dir: PathBuf,
    /// Remote ingestion endpoint. When unset, batches go straight to the
    /// in-process gateway.
    pub api_url: Option<String>,
    pub session_open: String,
    pub session_close: String,
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    pub cycle_interval_secs: u64,
    pub off_session_sleep_secs: u64,
    pub trigger_timeout_secs: u64,
    pub completion_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub trigger_xpath: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            target_url: String::new(),
            webdriver_url: "http://localhost:9515".into(),
            headless: true,
            output_dir: PathBuf::from("downloads"),
            api_url: None,
            session_open: "09:15".into(),
            session_close: "15:30".into(),
            max_attempts: 3,
            retry_delay_secs: 5,
            cycle_interval_secs: 60,
            off_session_sleep_secs: 3600,
            trigger_timeout_secs: 5,
            completion_timeout_secs: 10,
            poll_interval_ms: 300,
            trigger_xpath: r#"//span[text()="CSV"]"#.into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { enabled: true, port: 5000 }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    /// `sqlite://...` URL. Unset means an in-memory store.
    pub database_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.scraper.session()?;
        Ok(config)
    }

    /// `DATABASE_URL` if set, otherwise `storage.database_url`.
    pub fn database_url(&self) -> Option<String> {
        std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.storage.database_url.clone())
    }
}

impl ScraperConfig {
    pub fn session(&self) -> Result<SessionWindow> {
        SessionWindow::parse(&self.session_open, &self.session_close)
    }

    pub fn worker_config(&self) -> Result<WorkerConfig> {
        Ok(WorkerConfig {
            target_url: self.target_url.clone(),
            output_dir: self.output_dir.clone(),
            session: self.session()?,
            max_attempts: self.max_attempts,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
            cycle_interval: Duration::from_secs(self.cycle_interval_secs),
            off_session_sleep: Duration::from_secs(self.off_session_sleep_secs),
            completion_timeout: Duration::from_secs(self.completion_timeout_secs),
        })
    }

    pub fn browser_settings(&self) -> BrowserSettings {
        BrowserSettings {
            webdriver_url: self.webdriver_url.clone(),
            target_url: self.target_url.clone(),
            download_dir: self.output_dir.clone(),
            trigger_xpath: self.trigger_xpath.clone(),
            trigger_timeout: Duration::from_secs(self.trigger_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            headless: self.headless,
        }
    }
}
