//! CSV extract parsing.
//!
//! The screener export has the columns `Sr.`, `Stock Name`, `Symbol`,
//! `Links`, `%Chg`, `Price`, `Volume`. Columns are located by header so
//! their order does not matter; canonical snake_case headers are accepted
//! too. Only the symbol column is mandatory.

use csv::{ReaderBuilder, StringRecord, Trim};

use crate::types::{CycleError, RawRow};

const SYMBOL: &[&str] = &["Symbol", "symbol"];
const NAME: &[&str] = &["Stock Name", "Stock Narr", "name", "stock_name"];
const PERCENT_CHANGE: &[&str] = &["%Chg", "percent_change", "pct_chg"];
const PRICE: &[&str] = &["Price", "price"];
const VOLUME: &[&str] = &["Volume", "volume"];
const LINKS: &[&str] = &["Links", "links"];

struct Columns {
    symbol: usize,
    name: Option<usize>,
    percent_change: Option<usize>,
    price: Option<usize>,
    volume: Option<usize>,
    links: Option<usize>,
}

impl Columns {
    fn locate(headers: &StringRecord) -> Result<Self, CycleError> {
        let find = |names: &[&str]| headers.iter().position(|h| names.contains(&h.trim()));
        let symbol = find(SYMBOL).ok_or_else(|| {
            CycleError::ParseFailure(format!(
                "no Symbol column in header [{}]",
                headers.iter().collect::<Vec<_>>().join(", ")
            ))
        })?;
        Ok(Self {
            symbol,
            name: find(NAME),
            percent_change: find(PERCENT_CHANGE),
            price: find(PRICE),
            volume: find(VOLUME),
            links: find(LINKS),
        })
    }

    fn row(&self, record: &StringRecord) -> RawRow {
        let cell = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("");
        RawRow::from_text(
            cell(Some(self.symbol)),
            cell(self.name),
            cell(self.percent_change),
            cell(self.price),
            cell(self.volume),
            cell(self.links),
        )
    }
}

/// Parse an extract into rows, preserving file order.
///
/// Blank lines are skipped. An extract with a header but no data rows is a
/// parse failure: the page produced nothing worth forwarding.
pub fn parse_rows(content: &str) -> Result<Vec<RawRow>, CycleError> {
    let content = content.trim_start_matches('\u{feff}');
    let mut reader = ReaderBuilder::new()
        .flexible(true)
        .trim(Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| CycleError::ParseFailure(e.to_string()))?
        .clone();
    let columns = Columns::locate(&headers)?;

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record
            .map_err(|e| CycleError::ParseFailure(format!("record {}: {e}", line + 1)))?;
        if record.iter().all(|cell| cell.is_empty()) {
            continue;
        }
        rows.push(columns.row(&record));
    }

    if rows.is_empty() {
        return Err(CycleError::ParseFailure("extract contains no rows".into()));
    }
    Ok(rows)
}
