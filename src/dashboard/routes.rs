//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.
//! Failures come back as `{"error": "..."}` with a 4xx/5xx status.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::analytics::{AnalyticsEngine, Breakout, MomentumStock, TopPerformer};
use crate::health::{self, HealthReport};
use crate::ingest::IngestionGateway;
use crate::scraper::worker::StatusHandle;
use crate::storage::StoragePort;
use crate::types::{IngestError, RawRow, StoreError, Tick};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub gateway: Arc<IngestionGateway>,
    pub analytics: AnalyticsEngine,
    pub store: Arc<dyn StoragePort>,
    /// Present only when the scraper runs in this process.
    pub worker: Option<StatusHandle>,
}

impl DashboardState {
    pub fn new(store: Arc<dyn StoragePort>, worker: Option<StatusHandle>) -> Self {
        Self {
            gateway: Arc::new(IngestionGateway::new(store.clone())),
            analytics: AnalyticsEngine::new(store.clone()),
            store,
            worker,
        }
    }

    /// Share an existing gateway (the one the worker submits through).
    pub fn with_gateway(mut self, gateway: Arc<IngestionGateway>) -> Self {
        self.gateway = gateway;
        self
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::EmptyBatch => ApiError::BadRequest(e.to_string()),
            IngestError::PersistenceFailure(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        warn!(status = %status, error = %message, "Request failed");
        (status, Json(json!({ "error": message }))).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct InsertResponse {
    pub status: &'static str,
    pub rows: usize,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST /api/data/insert
pub async fn insert_data(
    State(state): State<AppState>,
    body: Result<Json<Vec<RawRow>>, JsonRejection>,
) -> Result<Json<InsertResponse>, ApiError> {
    let Json(rows) = body?;
    let receipt = state.gateway.ingest(&rows).await?;
    Ok(Json(InsertResponse { status: "success", rows: receipt.rows, timestamp: receipt.timestamp }))
}

/// GET /api/dashboard/latest
pub async fn get_latest(State(state): State<AppState>) -> Result<Json<Vec<Tick>>, ApiError> {
    Ok(Json(state.analytics.latest().await?))
}

/// GET /api/dashboard/stats (`{}` before any data arrives)
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let overview = state.analytics.overview(Utc::now()).await?;
    let body = match overview {
        Some(o) => serde_json::to_value(o).map_err(|e| ApiError::Internal(e.to_string()))?,
        None => json!({}),
    };
    Ok(Json(body))
}

/// GET /api/analytics/top-gainers
pub async fn get_top_gainers(State(state): State<AppState>) -> Result<Json<Vec<TopPerformer>>, ApiError> {
    Ok(Json(state.analytics.top_performers(Utc::now()).await?))
}

/// GET /api/analytics/momentum
pub async fn get_momentum(State(state): State<AppState>) -> Result<Json<Vec<MomentumStock>>, ApiError> {
    Ok(Json(state.analytics.momentum(Utc::now()).await?))
}

/// GET /api/analytics/breakouts
pub async fn get_breakouts(State(state): State<AppState>) -> Result<Json<Vec<Breakout>>, ApiError> {
    Ok(Json(state.analytics.breakouts(Utc::now()).await?))
}

/// GET /health
pub async fn get_health(State(state): State<AppState>) -> Json<HealthReport> {
    let worker = match &state.worker {
        Some(handle) => Some(handle.read().await.clone()),
        None => None,
    };
    Json(health::check(state.store.as_ref(), worker.as_ref(), Utc::now()).await)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
