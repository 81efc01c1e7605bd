//! SQLite tick store via sqlx.
//!
//! Decimals are stored as TEXT to keep them exact; timestamps as
//! milliseconds since the Unix epoch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

use super::StoragePort;
use crate::types::{StoreError, Tick};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS ticks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        symbol TEXT NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        percent_change TEXT NOT NULL,
        price TEXT NOT NULL,
        volume INTEGER NOT NULL,
        links TEXT NOT NULL DEFAULT '',
        observed_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_ticks_symbol ON ticks(symbol)",
    "CREATE INDEX IF NOT EXISTS idx_ticks_observed_at ON ticks(observed_at)",
];

const COLUMNS: &str = "symbol, name, percent_change, price, volume, links, observed_at";

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Configuration(_) => StoreError::Connection(e.to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Decode(e.to_string())
            }
            _ => StoreError::Query(e.to_string()),
        }
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url` and apply the schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // An in-memory database lives and dies with its single connection.
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "SQLite store ready");
        Ok(store)
    }

    pub async fn in_memory() -> Result<Self, StoreError> {
        Self::connect("sqlite::memory:").await
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn decode(row: &SqliteRow) -> Result<Tick, StoreError> {
        let decimal = |column: &str| -> Result<Decimal, StoreError> {
            let text: String = row.try_get(column)?;
            Decimal::from_str(&text)
                .map_err(|e| StoreError::Decode(format!("{column}={text:?}: {e}")))
        };
        let millis: i64 = row.try_get("observed_at")?;
        let observed_at = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| StoreError::Decode(format!("observed_at={millis} out of range")))?;

        Ok(Tick {
            symbol: row.try_get("symbol")?,
            name: row.try_get("name")?,
            percent_change: decimal("percent_change")?,
            price: decimal("price")?,
            volume: row.try_get("volume")?,
            links: row.try_get("links")?,
            observed_at,
        })
    }
}

#[async_trait]
impl StoragePort for SqliteStore {
    async fn bulk_append(&self, ticks: &[Tick]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for tick in ticks {
            sqlx::query(&format!("INSERT INTO ticks ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"))
                .bind(tick.symbol.as_str())
                .bind(tick.name.as_str())
                .bind(tick.percent_change.to_string())
                .bind(tick.price.to_string())
                .bind(tick.volume)
                .bind(tick.links.as_str())
                .bind(tick.observed_at.timestamp_millis())
                .execute(&mut *tx)
                .await?;
        }
        // Dropping `tx` on any early return above rolls the batch back.
        tx.commit().await?;
        debug!(rows = ticks.len(), "Batch committed");
        Ok(())
    }

    async fn ticks_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Tick>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM ticks WHERE observed_at > ? ORDER BY observed_at, id"
        ))
        .bind(cutoff.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::decode).collect()
    }

    async fn latest_distinct(&self) -> Result<Vec<Tick>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM (
                SELECT *, ROW_NUMBER() OVER (
                    PARTITION BY symbol ORDER BY observed_at DESC, id DESC
                ) AS rn
                FROM ticks
            ) WHERE rn = 1 ORDER BY symbol"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::decode).collect()
    }

    async fn latest_observed_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let millis: Option<i64> = sqlx::query_scalar("SELECT MAX(observed_at) FROM ticks")
            .fetch_one(&self.pool)
            .await?;
        Ok(millis.and_then(DateTime::from_timestamp_millis))
    }
}
