//! Ingestion gateway.
//!
//! Validates and normalises raw rows, stamps the whole batch with one
//! ingestion time, and persists it with a single bulk-append call.
//!
//! Field-level problems never fail a batch: a missing or non-numeric
//! percent change, price or volume is stored as zero and the row's other
//! fields are kept. Percent and price figures are stored to 2 dp. Only
//! rows without a symbol are dropped.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::storage::StoragePort;
use crate::types::{round2, BatchReceipt, IngestError, RawRow, Tick};

/// Percent and price magnitudes above this are treated as unparseable.
pub const MAX_MAGNITUDE: Decimal = dec!(1000000000);

pub struct IngestionGateway {
    store: Arc<dyn StoragePort>,
}

impl IngestionGateway {
    pub fn new(store: Arc<dyn StoragePort>) -> Self {
        Self { store }
    }

    /// Ingest a batch stamped with the current time.
    pub async fn ingest(&self, records: &[RawRow]) -> Result<BatchReceipt, IngestError> {
        self.ingest_at(records, Utc::now()).await
    }

    /// Ingest a batch stamped with `observed_at`.
    pub async fn ingest_at(
        &self,
        records: &[RawRow],
        observed_at: DateTime<Utc>,
    ) -> Result<BatchReceipt, IngestError> {
        if records.is_empty() {
            return Err(IngestError::EmptyBatch);
        }

        let ticks: Vec<Tick> = records
            .iter()
            .filter_map(|row| normalise(row, observed_at))
            .collect();

        let dropped = records.len() - ticks.len();
        if dropped > 0 {
            warn!(dropped, "Rows without a symbol skipped");
        }
        if ticks.is_empty() {
            return Err(IngestError::EmptyBatch);
        }

        if let Err(e) = self.store.bulk_append(&ticks).await {
            error!(error = %e, rows = ticks.len(), "Batch insert failed, nothing persisted");
            return Err(IngestError::PersistenceFailure(e));
        }

        info!(rows = ticks.len(), timestamp = %observed_at.to_rfc3339(), "Inserted batch");
        Ok(BatchReceipt {
            rows: ticks.len(),
            timestamp: observed_at,
        })
    }
}

/// Turn one raw row into a tick, or `None` when it has no symbol.
pub fn normalise(row: &RawRow, observed_at: DateTime<Utc>) -> Option<Tick> {
    let symbol = coerce_text(row.symbol.as_ref());
    if symbol.is_empty() {
        return None;
    }

    let tick = Tick {
        name: coerce_text(row.name.as_ref()),
        percent_change: round2(coerce_decimal(row.percent_change.as_ref())),
        price: round2(coerce_decimal(row.price.as_ref())).max(Decimal::ZERO),
        volume: coerce_volume(row.volume.as_ref()),
        links: coerce_text(row.links.as_ref()),
        observed_at,
        symbol,
    };
    debug!(%tick, "Normalised row");
    Some(tick)
}

/// Strings are trimmed; numbers keep their JSON text; anything else is empty.
pub fn coerce_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Lenient decimal parse: accepts `"6.2"`, `"6.2%"`, `"1,234.5"`, `1e3`,
/// JSON numbers. Anything unparseable or beyond [`MAX_MAGNITUDE`] is zero.
pub fn coerce_decimal(value: Option<&Value>) -> Decimal {
    let text = match value {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => clean_numeric(s),
        _ => return Decimal::ZERO,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
        .filter(|d| d.abs() <= MAX_MAGNITUDE)
        .unwrap_or(Decimal::ZERO)
}

/// Volume is a non-negative integer; fractional input is truncated.
pub fn coerce_volume(value: Option<&Value>) -> i64 {
    let volume = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => {
            let text = clean_numeric(s);
            text.parse::<i64>().unwrap_or_else(|_| {
                Decimal::from_str(&text)
                    .ok()
                    .and_then(|d| i64::try_from(d.trunc()).ok())
                    .unwrap_or(0)
            })
        }
        _ => 0,
    };
    volume.max(0)
}

fn clean_numeric(s: &str) -> String {
    s.trim()
        .trim_end_matches('%')
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
