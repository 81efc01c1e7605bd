//! Shared types for the SCREENER service.
//!
//! These types form the data model used across all modules.
//! The scraper, ingestion gateway, storage adapters and analytics
//! engine depend on them without depending on each other.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

/// One observation of one symbol at one moment.
///
/// Ticks are append-only: created in bulk by the ingestion gateway,
/// never updated, never deleted by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    pub name: String,
    /// Signed percent change as reported by the screener.
    pub percent_change: Decimal,
    pub price: Decimal,
    pub volume: i64,
    /// Ingestion time, shared by every tick of the batch.
    pub observed_at: DateTime<Utc>,
    /// Provenance/category tag, stored verbatim.
    pub links: String,
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) {}% @ {} vol {} [{}]",
            self.symbol,
            self.name,
            self.percent_change,
            self.price,
            self.volume,
            self.observed_at.format("%H:%M:%S"),
        )
    }
}

impl Tick {
    /// Helper to build a test tick with sensible defaults.
    #[cfg(test)]
    pub fn sample(symbol: &str, percent_change: Decimal, price: Decimal, at: DateTime<Utc>) -> Self {
        Tick {
            symbol: symbol.to_string(),
            name: format!("{symbol} Ltd"),
            percent_change,
            price,
            volume: 1_000,
            observed_at: at,
            links: "P&F".to_string(),
        }
    }
}

/// Round to 2 decimal places, halves away from zero (SQL `ROUND` semantics).
pub fn round2(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
}

// ---------------------------------------------------------------------------
// Raw rows
// ---------------------------------------------------------------------------

/// One row as received from the screener extract or the ingestion endpoint.
///
/// Every field is loosely typed: the gateway coerces values defensively
/// instead of rejecting the batch. Both canonical names and the screener's
/// CSV header names are accepted on input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    #[serde(default, alias = "Symbol")]
    pub symbol: Option<Value>,
    #[serde(default, alias = "Stock Name", alias = "Stock Narr", alias = "stock_name")]
    pub name: Option<Value>,
    #[serde(default, alias = "%Chg", alias = "pct_chg")]
    pub percent_change: Option<Value>,
    #[serde(default, alias = "Price")]
    pub price: Option<Value>,
    #[serde(default, alias = "Volume")]
    pub volume: Option<Value>,
    #[serde(default, alias = "Links")]
    pub links: Option<Value>,
}

impl RawRow {
    /// Build a row from plain text cells, the way a CSV extract yields them.
    pub fn from_text(
        symbol: &str,
        name: &str,
        percent_change: &str,
        price: &str,
        volume: &str,
        links: &str,
    ) -> Self {
        let cell = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| Value::String(s.to_string()))
        };
        RawRow {
            symbol: cell(symbol),
            name: cell(name),
            percent_change: cell(percent_change),
            price: cell(price),
            volume: cell(volume),
            links: cell(links),
        }
    }
}

// ---------------------------------------------------------------------------
// Batch receipt
// ---------------------------------------------------------------------------

/// Summary returned once a batch has been persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReceipt {
    /// Number of ticks persisted.
    pub rows: usize,
    /// The `observed_at` shared by the whole batch.
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for BatchReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rows @ {}", self.rows, self.timestamp.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures inside one fetch cycle. All are recoverable by the retry policy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CycleError {
    #[error("Trigger element not actionable within {waited_ms}ms")]
    TriggerTimeout { waited_ms: u64 },

    #[error("No complete artifact appeared within {waited_ms}ms")]
    ExtractionTimeout { waited_ms: u64 },

    #[error("Failed to parse extract: {0}")]
    ParseFailure(String),

    #[error("Batch submission failed: {0}")]
    SubmissionFailure(String),

    #[error("Page fetcher error: {0}")]
    Fetcher(String),
}

/// Failures surfaced by the ingestion gateway.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("No data")]
    EmptyBatch,

    #[error("Persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),
}

/// Failures reported by a storage adapter.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("Storage unavailable: {0}")]
    Connection(String),

    #[error("Storage query failed: {0}")]
    Query(String),

    #[error("Corrupt stored row: {0}")]
    Decode(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
