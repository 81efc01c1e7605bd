//! Analytics engine: derived views over the tick series.
//!
//! Every view is recomputed from the store on each call; nothing is
//! cached or maintained incrementally. A view with no qualifying symbols
//! is an empty success, distinct from a storage failure.
//!
//! | View            | Window   | Qualification                       | Ranking                  | Limit |
//! |-----------------|----------|-------------------------------------|--------------------------|-------|
//! | Overview        | latest   | none                                | by symbol                | all   |
//! | Top performers  | 1 hour   | ≥ 3 observations                    | mean change ↓            | 25    |
//! | Momentum        | 30 min   | ≥ 25 observations, mean change > 0  | mean change ↓, count ↓   | 20    |
//! | Breakouts       | 15 min   | price range > 2% of mean price      | max change ↓             | 20    |

pub mod window;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::storage::StoragePort;
use crate::types::{round2, StoreError, Tick};
use window::{Qualification, Ranking, SymbolWindow, WindowQuery};

// ---------------------------------------------------------------------------
// View definitions
// ---------------------------------------------------------------------------

/// Symbols above this percent change count as big gainers in the overview.
const BIG_MOVE_PCT: Decimal = dec!(5);

/// Cap on the latest-snapshot listing.
pub const LATEST_LIMIT: usize = 100;

pub fn top_performers_query() -> WindowQuery {
    WindowQuery {
        window: Duration::hours(1),
        qualify: Qualification {
            min_observations: 3,
            ..Default::default()
        },
        ranking: Ranking::MeanChangeDesc,
        limit: 25,
    }
}

pub fn momentum_query() -> WindowQuery {
    WindowQuery {
        window: Duration::minutes(30),
        qualify: Qualification {
            min_observations: 25,
            mean_change_above: Some(Decimal::ZERO),
            ..Default::default()
        },
        ranking: Ranking::MeanChangeThenCountDesc,
        limit: 20,
    }
}

pub fn breakouts_query() -> WindowQuery {
    WindowQuery {
        window: Duration::minutes(15),
        qualify: Qualification {
            min_observations: 1,
            price_range_ratio_above: Some(dec!(0.02)),
            ..Default::default()
        },
        ranking: Ranking::MaxChangeDesc,
        limit: 20,
    }
}

// ---------------------------------------------------------------------------
// View rows
// ---------------------------------------------------------------------------

/// Scalar market metrics over the latest tick of every symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketOverview {
    pub total_symbols: usize,
    /// Mean percent change across symbols, 2 dp.
    pub market_avg: Decimal,
    pub gainers_5pct: usize,
    pub losers_5pct: usize,
    pub total_volume: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopPerformer {
    pub symbol: String,
    pub stock_name: String,
    pub avg_gain: Decimal,
    pub max_gain: Decimal,
    pub min_gain: Decimal,
    pub max_price: Decimal,
    pub max_volume: i64,
    pub occurrences: usize,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MomentumStock {
    pub symbol: String,
    pub stock_name: String,
    pub avg_gain: Decimal,
    pub appearances: usize,
    pub last_updated: DateTime<Utc>,
    /// Max minus min percent change inside the window.
    pub volatility: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breakout {
    pub symbol: String,
    pub stock_name: String,
    pub price_high: Decimal,
    pub price_low: Decimal,
    pub max_gain: Decimal,
    pub price_range: Decimal,
    pub avg_volume: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl From<SymbolWindow> for TopPerformer {
    fn from(w: SymbolWindow) -> Self {
        Self {
            avg_gain: round2(w.mean_change),
            max_gain: w.max_change,
            min_gain: w.min_change,
            max_price: w.max_price,
            max_volume: w.max_volume,
            occurrences: w.observations,
            last_updated: w.last_updated,
            stock_name: w.name,
            symbol: w.symbol,
        }
    }
}

impl From<SymbolWindow> for MomentumStock {
    fn from(w: SymbolWindow) -> Self {
        Self {
            avg_gain: round2(w.mean_change),
            appearances: w.observations,
            last_updated: w.last_updated,
            volatility: round2(w.change_spread()),
            stock_name: w.name,
            symbol: w.symbol,
        }
    }
}

impl From<SymbolWindow> for Breakout {
    fn from(w: SymbolWindow) -> Self {
        Self {
            price_high: round2(w.max_price),
            price_low: round2(w.min_price),
            max_gain: round2(w.max_change),
            price_range: round2(w.price_range()),
            avg_volume: w
                .mean_volume
                .round_dp_with_strategy(0, rust_decimal::RoundingStrategy::MidpointAwayFromZero),
            last_updated: w.last_updated,
            stock_name: w.name,
            symbol: w.symbol,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct AnalyticsEngine {
    store: Arc<dyn StoragePort>,
}

impl AnalyticsEngine {
    pub fn new(store: Arc<dyn StoragePort>) -> Self {
        Self { store }
    }

    /// Latest tick per symbol, capped at [`LATEST_LIMIT`].
    pub async fn latest(&self) -> Result<Vec<Tick>, StoreError> {
        let mut ticks = self.store.latest_distinct().await.map_err(|e| {
            error!(error = %e, "Latest snapshot query failed");
            e
        })?;
        ticks.truncate(LATEST_LIMIT);
        Ok(ticks)
    }

    /// Market overview, or `None` when nothing has been ingested yet.
    pub async fn overview(&self, now: DateTime<Utc>) -> Result<Option<MarketOverview>, StoreError> {
        let latest = self.store.latest_distinct().await.map_err(|e| {
            error!(error = %e, "Overview query failed");
            e
        })?;
        Ok(summarise(&latest, now))
    }

    pub async fn top_performers(&self, now: DateTime<Utc>) -> Result<Vec<TopPerformer>, StoreError> {
        self.run("top_performers", &top_performers_query(), now).await
    }

    pub async fn momentum(&self, now: DateTime<Utc>) -> Result<Vec<MomentumStock>, StoreError> {
        self.run("momentum", &momentum_query(), now).await
    }

    pub async fn breakouts(&self, now: DateTime<Utc>) -> Result<Vec<Breakout>, StoreError> {
        self.run("breakouts", &breakouts_query(), now).await
    }

    async fn run<T: From<SymbolWindow>>(
        &self,
        view: &str,
        query: &WindowQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<T>, StoreError> {
        match self.store.query_window(query, now).await {
            Ok(rows) => {
                debug!(view, rows = rows.len(), "View computed");
                Ok(rows.into_iter().map(T::from).collect())
            }
            Err(e) => {
                error!(view, error = %e, "View query failed");
                Err(e)
            }
        }
    }
}

/// Overview metrics over a latest-per-symbol snapshot.
pub fn summarise(latest: &[Tick], now: DateTime<Utc>) -> Option<MarketOverview> {
    if latest.is_empty() {
        return None;
    }
    let total = latest.len();

    Some(MarketOverview {
        total_symbols: total,
        market_avg: round2(mean_change(latest)),
        gainers_5pct: latest.iter().filter(|t| t.percent_change > BIG_MOVE_PCT).count(),
        losers_5pct: latest.iter().filter(|t| t.percent_change < -BIG_MOVE_PCT).count(),
        total_volume: latest.iter().map(|t| t.volume).fold(0i64, i64::saturating_add),
        timestamp: now,
    })
}

/// Mean percent change. Falls back to summing per-row quotients when the
/// plain sum leaves the decimal range.
fn mean_change(ticks: &[Tick]) -> Decimal {
    let n = Decimal::from(ticks.len());
    let sum = ticks
        .iter()
        .try_fold(Decimal::ZERO, |acc, t| acc.checked_add(t.percent_change));
    match sum {
        Some(sum) => sum / n,
        None => {
            warn!(symbols = ticks.len(), "Overview change sum overflowed");
            ticks
                .iter()
                .fold(Decimal::ZERO, |acc, t| acc.saturating_add(t.percent_change / n))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, MockStoragePort};

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-21T11:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn at(mins_ago: i64) -> DateTime<Utc> {
        now() - Duration::minutes(mins_ago)
    }

    async fn engine_with(ticks: Vec<Tick>) -> AnalyticsEngine {
        let store = Arc::new(MemoryStore::new());
        store.bulk_append(&ticks).await.unwrap();
        AnalyticsEngine::new(store)
    }

    #[test]
    fn test_summarise() {
        let ticks = vec![
            Tick::sample("AAA", dec!(6), dec!(10), now()),
            Tick::sample("BBB", dec!(-7), dec!(10), now()),
            Tick::sample("CCC", dec!(5), dec!(10), now()),
            Tick::sample("DDD", dec!(0.333), dec!(10), now()),
        ];
        let o = summarise(&ticks, now()).unwrap();
        assert_eq!(o.total_symbols, 4);
        assert_eq!(o.market_avg, dec!(1.08));
        assert_eq!(o.gainers_5pct, 1); // exactly +5 is not above
        assert_eq!(o.losers_5pct, 1);
        assert_eq!(o.total_volume, 4_000);
        assert!(summarise(&[], now()).is_none());
    }

    #[tokio::test]
    async fn test_views_survive_extreme_values() {
        let engine = engine_with(vec![
            Tick::sample("AAA", Decimal::MAX, Decimal::MAX, at(2)),
            Tick::sample("AAA", Decimal::MAX, Decimal::MAX, at(1)),
            Tick::sample("BBB", Decimal::MAX, dec!(10), at(1)),
        ])
        .await;

        let o = engine.overview(now()).await.unwrap().unwrap();
        assert_eq!(o.total_symbols, 2);
        assert!(o.market_avg > Decimal::from(u64::MAX));

        assert!(engine.breakouts(now()).await.unwrap().is_empty());
        let top = engine.top_performers(now()).await.unwrap();
        assert!(top.iter().all(|r| r.symbol != "AAA"));
    }

    #[tokio::test]
    async fn test_overview_uses_latest_tick_per_symbol() {
        let engine = engine_with(vec![
            Tick::sample("AAA", dec!(9), dec!(10), at(5)),
            Tick::sample("AAA", dec!(1), dec!(10), at(1)),
        ])
        .await;
        let o = engine.overview(now()).await.unwrap().unwrap();
        assert_eq!(o.total_symbols, 1);
        assert_eq!(o.market_avg, dec!(1));
        assert_eq!(o.gainers_5pct, 0);
    }

    #[tokio::test]
    async fn test_top_performers_needs_three_observations() {
        let engine = engine_with(vec![
            Tick::sample("AAA", dec!(6), dec!(10), at(30)),
            Tick::sample("AAA", dec!(7), dec!(10), at(20)),
            Tick::sample("BBB", dec!(1), dec!(10), at(30)),
            Tick::sample("BBB", dec!(2), dec!(10), at(20)),
            Tick::sample("BBB", dec!(3.333), dec!(10), at(10)),
        ])
        .await;
        let rows = engine.top_performers(now()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "BBB");
        assert_eq!(rows[0].avg_gain, dec!(2.11));
        assert_eq!(rows[0].occurrences, 3);
        assert!(rows.iter().all(|r| r.occurrences >= 3));
    }

    #[tokio::test]
    async fn test_momentum_requires_volume_of_observations_and_positive_mean() {
        let mut ticks = Vec::new();
        for i in 0..25 {
            ticks.push(Tick::sample("UP", dec!(0.4), dec!(10), at(i)));
            ticks.push(Tick::sample("FLAT", Decimal::ZERO, dec!(10), at(i)));
        }
        for i in 0..24 {
            ticks.push(Tick::sample("FEW", dec!(9), dec!(10), at(i)));
        }
        let engine = engine_with(ticks).await;
        let rows = engine.momentum(now()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol, "UP");
        assert_eq!(rows[0].appearances, 25);
        assert_eq!(rows[0].volatility, Decimal::ZERO);
        assert!(rows.iter().all(|r| r.avg_gain > Decimal::ZERO));
    }

    #[tokio::test]
    async fn test_breakouts_filter_on_price_range() {
        let engine = engine_with(vec![
            Tick::sample("JUMP", dec!(2), dec!(100), at(10)),
            Tick::sample("JUMP", dec!(8), dec!(106), at(5)),
            Tick::sample("CALM", dec!(9), dec!(100), at(10)),
            Tick::sample("CALM", dec!(9), dec!(101), at(5)),
            Tick::sample("OLD", dec!(1), dec!(50), at(20)),
            Tick::sample("OLD", dec!(1), dec!(80), at(5)),
        ])
        .await;
        let rows = engine.breakouts(now()).await.unwrap();
        assert_eq!(rows.len(), 1);
        let b = &rows[0];
        assert_eq!(b.symbol, "JUMP");
        assert_eq!(b.price_high, dec!(106));
        assert_eq!(b.price_low, dec!(100));
        assert_eq!(b.price_range, dec!(6));
        assert_eq!(b.max_gain, dec!(8));
        assert_eq!(b.avg_volume, dec!(1000));
    }

    #[tokio::test]
    async fn test_empty_store_gives_empty_views() {
        let engine = engine_with(Vec::new()).await;
        assert!(engine.overview(now()).await.unwrap().is_none());
        assert!(engine.latest().await.unwrap().is_empty());
        assert!(engine.top_performers(now()).await.unwrap().is_empty());
        assert!(engine.momentum(now()).await.unwrap().is_empty());
        assert!(engine.breakouts(now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_is_an_error_not_an_empty_view() {
        let mut store = MockStoragePort::new();
        store
            .expect_query_window()
            .returning(|_, _| Err(StoreError::Connection("database is down".into())));
        store
            .expect_latest_distinct()
            .returning(|| Err(StoreError::Connection("database is down".into())));
        let engine = AnalyticsEngine::new(Arc::new(store));

        assert!(engine.top_performers(now()).await.is_err());
        assert!(engine.momentum(now()).await.is_err());
        assert!(engine.breakouts(now()).await.is_err());
        assert!(matches!(
            engine.overview(now()).await,
            Err(StoreError::Connection(_))
        ));
    }
}
