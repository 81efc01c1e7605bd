//! Dashboard: Axum web server for ingestion and analytics.
//!
//! Serves the ingestion endpoint, the analytics REST API, the health
//! report and a self-contained HTML dashboard. CORS enabled for local
//! development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    response::Html,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

use routes::AppState;

/// The embedded dashboard HTML (compiled into the binary).
const DASHBOARD_HTML: &str = include_str!("templates/index.html");

/// Bind `port` and serve until the task is dropped.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    info!(port, "Dashboard server listening on http://localhost:{port}");

    axum::serve(listener, app).await.context("Dashboard server error")
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // Ingestion
        .route("/api/data/insert", post(routes::insert_data))
        // Dashboard + analytics
        .route("/api/dashboard/latest", get(routes::get_latest))
        .route("/api/dashboard/stats", get(routes::get_stats))
        .route("/api/analytics/top-gainers", get(routes::get_top_gainers))
        .route("/api/analytics/momentum", get(routes::get_momentum))
        .route("/api/analytics/breakouts", get(routes::get_breakouts))
        .route("/health", get(routes::get_health))
        // Dashboard HTML
        .route("/", get(serve_dashboard))
        .layer(cors)
        .with_state(state)
}

/// Serve the embedded HTML dashboard.
async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StoragePort};
    use crate::types::Tick;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{Duration, Utc};
    use routes::DashboardState;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state(store: Arc<MemoryStore>) -> AppState {
        Arc::new(DashboardState::new(store, None))
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post_insert(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/data/insert")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_accepts_csv_header_names() {
        let store = Arc::new(MemoryStore::new());
        let app = build_router(test_state(store.clone()));
        let body = r#"[{"Symbol":"AAA","Stock Narr":"Alpha","%Chg":"6.2","Price":"101.5","Volume":"10,000","Links":"P&F"}]"#;

        let resp = app.oneshot(post_insert(body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["rows"], 1);

        let stored = store.all().await;
        assert_eq!(stored[0].name, "Alpha");
        assert_eq!(stored[0].volume, 10_000);
    }

    #[tokio::test]
    async fn test_insert_empty_and_malformed_bodies() {
        let app = build_router(test_state(Arc::new(MemoryStore::new())));
        let resp = app.clone().oneshot(post_insert("[]")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["error"], "No data");

        let resp = app.oneshot(post_insert("{not json")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_analytics_endpoints_empty_success() {
        let app = build_router(test_state(Arc::new(MemoryStore::new())));
        for uri in [
            "/api/dashboard/latest",
            "/api/analytics/top-gainers",
            "/api/analytics/momentum",
            "/api/analytics/breakouts",
        ] {
            let (status, json) = get_json(app.clone(), uri).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(json, serde_json::json!([]), "{uri}");
        }
        let (status, json) = get_json(app, "/api/dashboard/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_stats_and_top_gainers_with_data() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let ticks: Vec<Tick> = (0..3)
            .map(|i| Tick::sample("AAA", dec!(6), dec!(100), now - Duration::minutes(i * 10)))
            .collect();
        store.bulk_append(&ticks).await.unwrap();
        let app = build_router(test_state(store));

        let (_, stats) = get_json(app.clone(), "/api/dashboard/stats").await;
        assert_eq!(stats["total_symbols"], 1);
        assert_eq!(stats["gainers_5pct"], 1);

        let (_, top) = get_json(app, "/api/analytics/top-gainers").await;
        assert_eq!(top[0]["symbol"], "AAA");
        assert_eq!(top[0]["occurrences"], 3);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(test_state(Arc::new(MemoryStore::new())));
        let (status, json) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["components"]["data_freshness"]["status"], "UNKNOWN");
    }

    #[tokio::test]
    async fn test_dashboard_html() {
        let app = build_router(test_state(Arc::new(MemoryStore::new())));
        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("SCREENER"));
        assert!(html.contains("/api/analytics/momentum"));
    }
}
