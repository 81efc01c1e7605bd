//! Health signal: per-component status for the external health reporter.
//!
//! Three components are reported: data freshness (age of the newest tick),
//! store reachability, and the scrape worker's last cycle outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::scraper::worker::{CycleState, WorkerStatus};
use crate::storage::StoragePort;

/// Newest tick younger than this is healthy.
pub const FRESH_MINUTES: i64 = 2;
/// Newest tick younger than this is degraded; anything older is stale.
pub const DEGRADED_MINUTES: i64 = 10;
/// Consecutive failed cycles after which the worker counts as failed.
pub const WORKER_FAILURE_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Stale,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_minutes: Option<i64>,
}

impl ComponentHealth {
    fn new(status: HealthStatus, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), age_minutes: None }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub components: BTreeMap<String, ComponentHealth>,
}

/// Classify the age of the newest tick.
pub fn data_freshness(latest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ComponentHealth {
    let Some(latest) = latest else {
        return ComponentHealth::new(HealthStatus::Unknown, "No data ingested yet");
    };
    let age = (now - latest).num_minutes().max(0);
    let status = if age < FRESH_MINUTES {
        HealthStatus::Healthy
    } else if age < DEGRADED_MINUTES {
        HealthStatus::Degraded
    } else {
        HealthStatus::Stale
    };
    ComponentHealth {
        status,
        message: format!("Latest data is {age} minutes old"),
        age_minutes: Some(age),
    }
}

pub fn worker_health(status: &WorkerStatus) -> ComponentHealth {
    match status.state {
        _ if status.consecutive_failures >= WORKER_FAILURE_LIMIT => ComponentHealth::new(
            HealthStatus::Failed,
            format!(
                "{} consecutive failed cycles: {}",
                status.consecutive_failures,
                status.last_error.as_deref().unwrap_or("unknown error")
            ),
        ),
        CycleState::Failed => ComponentHealth::new(
            HealthStatus::Degraded,
            format!("Last cycle failed: {}", status.last_error.as_deref().unwrap_or("unknown error")),
        ),
        _ if status.cycles_run == 0 && !status.in_session => {
            ComponentHealth::new(HealthStatus::Unknown, "Outside market session, no cycle run yet")
        }
        _ if status.cycles_run == 0 => ComponentHealth::new(HealthStatus::Unknown, "First cycle in progress"),
        _ => ComponentHealth::new(
            HealthStatus::Healthy,
            format!("{} cycles run, last state {:?}", status.cycles_run, status.state),
        ),
    }
}

/// Fold component statuses into one.
pub fn overall(components: &BTreeMap<String, ComponentHealth>) -> HealthStatus {
    let statuses: Vec<HealthStatus> = components.values().map(|c| c.status).collect();
    if statuses.iter().all(|s| *s == HealthStatus::Healthy) {
        HealthStatus::Healthy
    } else if statuses.contains(&HealthStatus::Failed) {
        HealthStatus::Failed
    } else if statuses.contains(&HealthStatus::Stale) {
        HealthStatus::Stale
    } else if statuses.iter().all(|s| *s == HealthStatus::Unknown) {
        HealthStatus::Unknown
    } else {
        HealthStatus::Degraded
    }
}

/// Build a full report. `worker` is `None` when the scraper is disabled.
pub async fn check(
    store: &dyn StoragePort,
    worker: Option<&WorkerStatus>,
    now: DateTime<Utc>,
) -> HealthReport {
    let mut components = BTreeMap::new();

    match store.latest_observed_at().await {
        Ok(latest) => {
            components.insert(
                "storage".to_string(),
                ComponentHealth::new(HealthStatus::Healthy, "Store reachable"),
            );
            components.insert("data_freshness".to_string(), data_freshness(latest, now));
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not reach store");
            components.insert(
                "storage".to_string(),
                ComponentHealth::new(HealthStatus::Failed, e.to_string()),
            );
            components.insert(
                "data_freshness".to_string(),
                ComponentHealth::new(HealthStatus::Failed, "Store unreachable"),
            );
        }
    }

    if let Some(status) = worker {
        components.insert("scraper".to_string(), worker_health(status));
    }

    HealthReport { overall: overall(&components), timestamp: now, components }
}
