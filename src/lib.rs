//! SCREENER: session-aware market screener scraper with windowed analytics.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod session;
pub mod ingest;
pub mod storage;
pub mod analytics;
pub mod scraper;
pub mod health;
pub mod dashboard;
