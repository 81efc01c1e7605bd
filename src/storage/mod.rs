//! Persistence layer.
//!
//! Defines the `StoragePort` trait the core depends on and provides
//! two adapters:
//! - `MemoryStore`: process-local, used by tests and store-less runs
//! - `SqliteStore`: durable tick series via sqlx/SQLite
//!
//! Adapters are responsible for their own concurrency control: a single
//! `bulk_append` call is atomic (all rows or none).

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::analytics::window::{SymbolWindow, WindowQuery};
use crate::types::{StoreError, Tick};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Abstraction over the time-series store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Append a batch atomically.
    async fn bulk_append(&self, ticks: &[Tick]) -> Result<(), StoreError>;

    /// Every tick with `observed_at` strictly after `cutoff`.
    async fn ticks_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Tick>, StoreError>;

    /// The most recent tick per symbol, ordered by symbol.
    async fn latest_distinct(&self) -> Result<Vec<Tick>, StoreError>;

    /// Timestamp of the newest stored tick, if any.
    async fn latest_observed_at(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Run a windowed aggregate query as of `now`.
    ///
    /// The default pulls the window's ticks and aggregates them in process.
    async fn query_window(
        &self,
        query: &WindowQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<SymbolWindow>, StoreError> {
        let ticks = self.ticks_since(query.cutoff(now)).await?;
        Ok(query.evaluate(&ticks, now))
    }
}
