//! Per-security Parquet store.
//!
//! Layout: `{data_dir}/{code}.parquet` — one whole-file table per
//! security, columns ts / open / high / low / close / volume / amount —
//! plus a `{code}.meta.json` sidecar (span, bar count, content hash)
//! consumed only by status reporting, never by fetch decisions.
//!
//! Writes are atomic: write to .tmp, rename into place. A partial write
//! never corrupts the previous table.

use crate::bars::BarRow;
use chrono::{NaiveDate, NaiveDateTime};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no stored table for security '{code}'")]
    NotFound { code: String },

    #[error("store I/O error: {0}")]
    Io(String),

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("schema validation failed: {0}")]
    Validation(String),
}

/// Metadata sidecar for one security's table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMeta {
    pub code: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub bar_count: usize,
    pub data_hash: String,
    pub written_at: chrono::NaiveDateTime,
}

/// Status summary for one security, as reported by `status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableStatus {
    pub code: String,
    pub present: bool,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub bar_count: Option<usize>,
}

const COLUMNS: [&str; 7] = ["ts", "open", "high", "low", "close", "volume", "amount"];

/// The per-security bar store.
pub struct BarStore {
    data_dir: PathBuf,
}

impl BarStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self { data_dir: data_dir.into() }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn table_path(&self, code: &str) -> PathBuf {
        self.data_dir.join(format!("{code}.parquet"))
    }

    fn meta_path(&self, code: &str) -> PathBuf {
        self.data_dir.join(format!("{code}.meta.json"))
    }

    /// Whether a table exists for the security.
    pub fn exists(&self, code: &str) -> bool {
        self.table_path(code).exists()
    }

    /// Load the full table for a security, sorted by timestamp.
    pub fn load(&self, code: &str) -> Result<Vec<BarRow>, StoreError> {
        let path = self.table_path(code);
        if !path.exists() {
            return Err(StoreError::NotFound { code: code.to_string() });
        }

        let file = fs::File::open(&path).map_err(|e| StoreError::Io(format!("open: {e}")))?;
        let df = ParquetReader::new(file)
            .finish()
            .map_err(|e| StoreError::Parquet(format!("read: {e}")))?;

        if df.height() == 0 {
            return Err(StoreError::Validation("empty parquet file".into()));
        }
        for col_name in &COLUMNS {
            if df.column(col_name).is_err() {
                return Err(StoreError::Validation(format!("missing column '{col_name}'")));
            }
        }

        let mut bars = dataframe_to_bars(&df)?;
        bars.sort_by_key(|b| b.ts);
        Ok(bars)
    }

    /// Write the full table for a security (atomic replace).
    ///
    /// The input is canonicalized first: sorted by timestamp, duplicate
    /// timestamps dropped keeping the last occurrence. Refuses an empty
    /// table — absence of a file is the "does not exist" state.
    pub fn write(&self, code: &str, bars: &[BarRow]) -> Result<(), StoreError> {
        if bars.is_empty() {
            return Err(StoreError::Validation("refusing to write empty table".into()));
        }

        fs::create_dir_all(&self.data_dir)
            .map_err(|e| StoreError::Io(format!("create dir: {e}")))?;

        let canonical = canonicalize(bars);
        let mut df = bars_to_dataframe(&canonical)?;

        let path = self.table_path(code);
        let tmp_path = path.with_extension("parquet.tmp");
        let file = fs::File::create(&tmp_path)
            .map_err(|e| StoreError::Parquet(format!("create file: {e}")))?;
        ParquetWriter::new(file)
            .finish(&mut df)
            .map_err(|e| StoreError::Parquet(format!("write parquet: {e}")))?;

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io(format!("atomic rename failed: {e}"))
        })?;

        // The table write above already landed; the sidecar only feeds
        // status reporting.
        let meta = TableMeta {
            code: code.to_string(),
            start: canonical.first().map(BarRow::date).unwrap(),
            end: canonical.last().map(BarRow::date).unwrap(),
            bar_count: canonical.len(),
            data_hash: blake3::hash(
                &serde_json::to_vec(&canonical)
                    .map_err(|e| StoreError::Io(format!("hash serialization: {e}")))?,
            )
            .to_hex()
            .to_string(),
            written_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| StoreError::Io(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(code), meta_json)
            .map_err(|e| StoreError::Io(format!("meta write: {e}")))?;

        Ok(())
    }

    /// Metadata sidecar for a security, if present and readable.
    pub fn meta(&self, code: &str) -> Option<TableMeta> {
        let content = fs::read_to_string(self.meta_path(code)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Status of a list of securities.
    pub fn status(&self, codes: &[&str]) -> Vec<TableStatus> {
        codes
            .iter()
            .map(|code| {
                let meta = self.meta(code);
                TableStatus {
                    code: code.to_string(),
                    present: self.exists(code),
                    start: meta.as_ref().map(|m| m.start),
                    end: meta.as_ref().map(|m| m.end),
                    bar_count: meta.as_ref().map(|m| m.bar_count),
                }
            })
            .collect()
    }
}

/// Sort by timestamp and drop duplicate timestamps, keeping the last
/// occurrence (matches the merge's new-wins rule).
fn canonicalize(bars: &[BarRow]) -> Vec<BarRow> {
    let mut sorted: Vec<BarRow> = bars.to_vec();
    sorted.sort_by_key(|b| b.ts);
    sorted.reverse();
    // After the reverse, the *last* occurrence of each timestamp comes
    // first, so dedup keeps it.
    sorted.dedup_by_key(|b| b.ts);
    sorted.reverse();
    sorted
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

fn bars_to_dataframe(bars: &[BarRow]) -> Result<DataFrame, StoreError> {
    let ts_ms: Vec<i64> = bars.iter().map(|b| b.ts.and_utc().timestamp_millis()).collect();
    let opens: Vec<f64> = bars.iter().map(|b| b.open).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
    let lows: Vec<f64> = bars.iter().map(|b| b.low).collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();
    let amounts: Vec<f64> = bars.iter().map(|b| b.amount).collect();

    DataFrame::new(vec![
        Column::new("ts".into(), ts_ms)
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))
            .map_err(|e| StoreError::Parquet(format!("ts cast: {e}")))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("amount".into(), amounts),
    ])
    .map_err(|e| StoreError::Parquet(format!("dataframe creation: {e}")))
}

fn dataframe_to_bars(df: &DataFrame) -> Result<Vec<BarRow>, StoreError> {
    let map_err = |e: PolarsError| StoreError::Parquet(format!("column read: {e}"));

    let ts = df.column("ts").map_err(map_err)?;
    let opens = df.column("open").map_err(map_err)?;
    let highs = df.column("high").map_err(map_err)?;
    let lows = df.column("low").map_err(map_err)?;
    let closes = df.column("close").map_err(map_err)?;
    let volumes = df.column("volume").map_err(map_err)?;
    let amounts = df.column("amount").map_err(map_err)?;

    let ts_ca = ts
        .datetime()
        .map_err(|e| StoreError::Parquet(format!("ts column type: {e}")))?;
    let open_ca = opens
        .f64()
        .map_err(|e| StoreError::Parquet(format!("open column type: {e}")))?;
    let high_ca = highs
        .f64()
        .map_err(|e| StoreError::Parquet(format!("high column type: {e}")))?;
    let low_ca = lows
        .f64()
        .map_err(|e| StoreError::Parquet(format!("low column type: {e}")))?;
    let close_ca = closes
        .f64()
        .map_err(|e| StoreError::Parquet(format!("close column type: {e}")))?;
    let vol_ca = volumes
        .u64()
        .map_err(|e| StoreError::Parquet(format!("volume column type: {e}")))?;
    let amount_ca = amounts
        .f64()
        .map_err(|e| StoreError::Parquet(format!("amount column type: {e}")))?;

    let n = df.height();
    let mut bars = Vec::with_capacity(n);
    for i in 0..n {
        let ms = ts_ca
            .get(i)
            .ok_or_else(|| StoreError::Parquet(format!("null ts at row {i}")))?;
        let ts: NaiveDateTime = chrono::DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| StoreError::Parquet(format!("invalid ts at row {i}: {ms}")))?
            .naive_utc();

        bars.push(BarRow {
            ts,
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(0),
            amount: amount_ca.get(i).unwrap_or(f64::NAN),
        });
    }

    Ok(bars)
}
