//! Trailing-window aggregation over the tick series.
//!
//! A [`WindowQuery`] is the SQL-free equivalent of
//! `WHERE observed_at > now - window GROUP BY symbol HAVING .. ORDER BY .. LIMIT ..`:
//! ticks are grouped per symbol, each group is folded into a
//! [`SymbolWindow`], groups failing the [`Qualification`] are dropped,
//! and the survivors are ranked and truncated.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::warn;

use crate::types::{round2, Tick};

// ---------------------------------------------------------------------------
// Query description
// ---------------------------------------------------------------------------

/// Conditions a symbol's window aggregate must satisfy to be reported.
/// All present conditions must hold.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Qualification {
    /// Minimum number of ticks inside the window.
    pub min_observations: usize,
    /// Mean percent change must be strictly greater than this.
    pub mean_change_above: Option<Decimal>,
    /// `(max price − min price)` must be strictly greater than
    /// `mean price × ratio`.
    pub price_range_ratio_above: Option<Decimal>,
}

impl Qualification {
    pub fn passes(&self, agg: &SymbolWindow) -> bool {
        if agg.observations < self.min_observations {
            return false;
        }
        if let Some(floor) = self.mean_change_above {
            if agg.mean_change <= floor {
                return false;
            }
        }
        if let Some(ratio) = self.price_range_ratio_above {
            if agg.price_range() <= agg.mean_price * ratio {
                return false;
            }
        }
        true
    }
}

/// Ordering applied to qualifying symbols. Ties fall back to symbol name
/// so that results are deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ranking {
    /// Mean percent change (2 dp), descending.
    MeanChangeDesc,
    /// Mean percent change (2 dp) descending, then observation count descending.
    MeanChangeThenCountDesc,
    /// Max percent change, descending.
    MaxChangeDesc,
}

impl Ranking {
    fn compare(&self, a: &SymbolWindow, b: &SymbolWindow) -> Ordering {
        let primary = match self {
            Ranking::MeanChangeDesc => round2(b.mean_change).cmp(&round2(a.mean_change)),
            Ranking::MeanChangeThenCountDesc => round2(b.mean_change)
                .cmp(&round2(a.mean_change))
                .then(b.observations.cmp(&a.observations)),
            Ranking::MaxChangeDesc => b.max_change.cmp(&a.max_change),
        };
        primary.then_with(|| a.symbol.cmp(&b.symbol))
    }
}

/// A ranked, filtered projection over a trailing time window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowQuery {
    pub window: Duration,
    pub qualify: Qualification,
    pub ranking: Ranking,
    pub limit: usize,
}

impl WindowQuery {
    /// Ticks strictly newer than this instant fall inside the window.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.window
    }

    /// Run the query over `ticks` as of `now`.
    ///
    /// `ticks` may contain rows outside the window; they are ignored.
    pub fn evaluate(&self, ticks: &[Tick], now: DateTime<Utc>) -> Vec<SymbolWindow> {
        let cutoff = self.cutoff(now);
        let in_window = ticks
            .iter()
            .filter(|t| t.observed_at > cutoff && t.observed_at <= now);

        let mut rows: Vec<SymbolWindow> = group_by_symbol(in_window)
            .into_iter()
            .filter(|agg| self.qualify.passes(agg))
            .collect();

        rows.sort_by(|a, b| self.ranking.compare(a, b));
        rows.truncate(self.limit);
        rows
    }
}

// ---------------------------------------------------------------------------
// Per-symbol aggregate
// ---------------------------------------------------------------------------

/// Everything the views need to know about one symbol inside a window.
/// Values are unrounded; views round when projecting.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolWindow {
    pub symbol: String,
    /// Display name from the most recent tick.
    pub name: String,
    pub observations: usize,
    pub mean_change: Decimal,
    pub max_change: Decimal,
    pub min_change: Decimal,
    pub max_price: Decimal,
    pub min_price: Decimal,
    pub mean_price: Decimal,
    pub max_volume: i64,
    pub mean_volume: Decimal,
    pub last_updated: DateTime<Utc>,
}

impl SymbolWindow {
    pub fn price_range(&self) -> Decimal {
        self.max_price.saturating_sub(self.min_price)
    }

    pub fn change_spread(&self) -> Decimal {
        self.max_change.saturating_sub(self.min_change)
    }
}

struct Accumulator {
    name: String,
    count: usize,
    sum_change: Option<Decimal>,
    max_change: Decimal,
    min_change: Decimal,
    sum_price: Option<Decimal>,
    max_price: Decimal,
    min_price: Decimal,
    sum_volume: i64,
    max_volume: i64,
    last: DateTime<Utc>,
}

impl Accumulator {
    fn new(tick: &Tick) -> Self {
        Self {
            name: tick.name.clone(),
            count: 1,
            sum_change: Some(tick.percent_change),
            max_change: tick.percent_change,
            min_change: tick.percent_change,
            sum_price: Some(tick.price),
            max_price: tick.price,
            min_price: tick.price,
            sum_volume: tick.volume,
            max_volume: tick.volume,
            last: tick.observed_at,
        }
    }

    fn push(&mut self, tick: &Tick) {
        self.count += 1;
        self.sum_change = self.sum_change.and_then(|sum| sum.checked_add(tick.percent_change));
        self.max_change = self.max_change.max(tick.percent_change);
        self.min_change = self.min_change.min(tick.percent_change);
        self.sum_price = self.sum_price.and_then(|sum| sum.checked_add(tick.price));
        self.max_price = self.max_price.max(tick.price);
        self.min_price = self.min_price.min(tick.price);
        self.sum_volume = self.sum_volume.saturating_add(tick.volume);
        self.max_volume = self.max_volume.max(tick.volume);
        if tick.observed_at >= self.last {
            self.last = tick.observed_at;
            self.name.clone_from(&tick.name);
        }
    }

    /// `None` when a running sum left the representable range.
    fn finish(self, symbol: String) -> Option<SymbolWindow> {
        let n = Decimal::from(self.count);
        let (Some(sum_change), Some(sum_price)) = (self.sum_change, self.sum_price) else {
            warn!(%symbol, observations = self.count, "Window sums overflowed, symbol skipped");
            return None;
        };
        Some(SymbolWindow {
            symbol,
            name: self.name,
            observations: self.count,
            mean_change: sum_change / n,
            max_change: self.max_change,
            min_change: self.min_change,
            max_price: self.max_price,
            min_price: self.min_price,
            mean_price: sum_price / n,
            max_volume: self.max_volume,
            mean_volume: Decimal::from(self.sum_volume) / n,
            last_updated: self.last,
        })
    }
}

/// Fold ticks into one aggregate per symbol, ordered by symbol.
pub fn group_by_symbol<'a>(ticks: impl IntoIterator<Item = &'a Tick>) -> Vec<SymbolWindow> {
    let mut groups: BTreeMap<&'a str, Accumulator> = BTreeMap::new();
    for tick in ticks {
        groups
            .entry(tick.symbol.as_str())
            .and_modify(|acc| acc.push(tick))
            .or_insert_with(|| Accumulator::new(tick));
    }
    groups
        .into_iter()
        .filter_map(|(symbol, acc)| acc.finish(symbol.to_string()))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
