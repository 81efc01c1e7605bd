//! In-memory tick store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::StoragePort;
use crate::types::{StoreError, Tick};

/// Append-only tick series held in process memory.
#[derive(Default)]
pub struct MemoryStore {
    ticks: RwLock<Vec<Tick>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored ticks.
    pub async fn len(&self) -> usize {
        self.ticks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ticks.read().await.is_empty()
    }

    /// Snapshot of every stored tick in insertion order.
    pub async fn all(&self) -> Vec<Tick> {
        self.ticks.read().await.clone()
    }
}

#[async_trait]
impl StoragePort for MemoryStore {
    async fn bulk_append(&self, ticks: &[Tick]) -> Result<(), StoreError> {
        self.ticks.write().await.extend_from_slice(ticks);
        Ok(())
    }

    async fn ticks_since(&self, cutoff: DateTime<Utc>) -> Result<Vec<Tick>, StoreError> {
        let ticks = self.ticks.read().await;
        Ok(ticks.iter().filter(|t| t.observed_at > cutoff).cloned().collect())
    }

    async fn latest_distinct(&self) -> Result<Vec<Tick>, StoreError> {
        let ticks = self.ticks.read().await;
        let mut latest: BTreeMap<&str, &Tick> = BTreeMap::new();
        for tick in ticks.iter() {
            // Later insertions win ties.
            match latest.get(tick.symbol.as_str()) {
                Some(current) if current.observed_at > tick.observed_at => {}
                _ => {
                    latest.insert(tick.symbol.as_str(), tick);
                }
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn latest_observed_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.ticks.read().await.iter().map(|t| t.observed_at).max())
    }
}
