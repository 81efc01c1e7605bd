//! `BatchSink` implementations: a remote ingestion endpoint over HTTP, and
//! the in-process gateway.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::BatchSink;
use crate::ingest::IngestionGateway;
use crate::types::{BatchReceipt, RawRow};

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(15);

/// Posts batches to `{base_url}/api/data/insert`.
pub struct HttpSink {
    http: Client,
    endpoint: String,
}

#[derive(Debug, Deserialize)]
struct InsertResponse {
    rows: usize,
    timestamp: DateTime<Utc>,
}

impl HttpSink {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder()
            .timeout(SUBMIT_TIMEOUT)
            .user_agent(concat!("SCREENER/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client for ingestion endpoint")?;
        let endpoint = format!("{}/api/data/insert", base_url.trim_end_matches('/'));
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl BatchSink for HttpSink {
    async fn submit(&self, rows: &[RawRow]) -> Result<BatchReceipt> {
        debug!(endpoint = %self.endpoint, rows = rows.len(), "Submitting batch");

        let resp = self
            .http
            .post(&self.endpoint)
            .json(rows)
            .send()
            .await
            .context("Ingestion request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Ingestion endpoint error {status}: {body}");
        }

        let parsed: InsertResponse = resp
            .json()
            .await
            .context("Failed to parse ingestion response")?;
        Ok(BatchReceipt { rows: parsed.rows, timestamp: parsed.timestamp })
    }
}

#[async_trait]
impl BatchSink for IngestionGateway {
    async fn submit(&self, rows: &[RawRow]) -> Result<BatchReceipt> {
        Ok(self.ingest(rows).await?)
    }
}
