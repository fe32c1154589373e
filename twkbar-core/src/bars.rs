//! Minute-bar rows and the canonical merge.
//!
//! A security's table is canonical when timestamps are strictly
//! ascending and unique. `merge_bars` is the only mutation path:
//! union keyed on timestamp, the newly fetched batch wins on
//! duplicates, full re-sort afterwards. Merging the same batch twice
//! is a no-op the second time.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One minute-bar observation, timestamped in exchange-local time
/// (Asia/Taipei). Natural key = `ts`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRow {
    pub ts: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub amount: f64,
}

impl BarRow {
    /// Date component of the timestamp — the unit the calendar diff
    /// works in.
    pub fn date(&self) -> NaiveDate {
        self.ts.date()
    }
}

/// Merge freshly fetched bars into an existing table.
///
/// Last-write-wins on duplicate timestamps: a bar in `fetched` replaces
/// any existing bar with the same `ts`. The result is sorted ascending
/// with unique timestamps, regardless of the order of either input.
pub fn merge_bars(existing: Vec<BarRow>, fetched: Vec<BarRow>) -> Vec<BarRow> {
    let mut by_ts: BTreeMap<NaiveDateTime, BarRow> = BTreeMap::new();
    for bar in existing.into_iter().chain(fetched) {
        by_ts.insert(bar.ts, bar);
    }
    by_ts.into_values().collect()
}
