//! Security master — reference data for the tradable universe.
//!
//! Rebuilt offline by the ISIN page scraper (`isin` module), persisted
//! as a Parquet table, and consumed read-only by the sync driver in a
//! fixed (instrument class, listing board) order.

use chrono::NaiveDate;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MasterError {
    #[error("security master file not found: {0}")]
    NotFound(String),

    #[error("master I/O error: {0}")]
    Io(String),

    #[error("master parquet error: {0}")]
    Parquet(String),

    #[error("unknown instrument class label: {0}")]
    UnknownClass(String),

    #[error("unknown board label: {0}")]
    UnknownBoard(String),
}

/// Instrument class, derived from the CFI code prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentClass {
    CommonStock,
    Tdr,
    Etf,
    Etn,
}

impl InstrumentClass {
    /// Classify from a CFI code. Returns `None` for prefixes outside
    /// the tracked universe (warrants, bonds, ...).
    pub fn from_cfi(cfi: &str) -> Option<Self> {
        let cfi = cfi.trim().to_uppercase();
        if cfi.starts_with("ESV") {
            Some(Self::CommonStock)
        } else if cfi.starts_with("ED") {
            Some(Self::Tdr)
        } else if cfi.starts_with("CE") {
            Some(Self::Etf)
        } else if cfi.starts_with("CM") {
            Some(Self::Etn)
        } else {
            None
        }
    }

    pub fn parse(label: &str) -> Result<Self, MasterError> {
        match label {
            "common_stock" => Ok(Self::CommonStock),
            "tdr" => Ok(Self::Tdr),
            "etf" => Ok(Self::Etf),
            "etn" => Ok(Self::Etn),
            other => Err(MasterError::UnknownClass(other.to_string())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::CommonStock => "common_stock",
            Self::Tdr => "tdr",
            Self::Etf => "etf",
            Self::Etn => "etn",
        }
    }

    /// Canonical iteration order: common stock → TDR → ETF → ETN.
    fn order(&self) -> u8 {
        match self {
            Self::CommonStock => 0,
            Self::Tdr => 1,
            Self::Etf => 2,
            Self::Etn => 3,
        }
    }
}

impl std::fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Listing venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Board {
    /// TWSE main board (listed).
    Twse,
    /// TPEx over-the-counter.
    Tpex,
    /// TPEx emerging stock board.
    Emerging,
}

impl Board {
    pub fn parse(label: &str) -> Result<Self, MasterError> {
        match label {
            "twse" => Ok(Self::Twse),
            "tpex" => Ok(Self::Tpex),
            "emerging" => Ok(Self::Emerging),
            other => Err(MasterError::UnknownBoard(other.to_string())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Twse => "twse",
            Self::Tpex => "tpex",
            Self::Emerging => "emerging",
        }
    }

    /// Canonical iteration order: TWSE → TPEx → emerging.
    fn order(&self) -> u8 {
        match self {
            Self::Twse => 0,
            Self::Tpex => 1,
            Self::Emerging => 2,
        }
    }
}

impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One security's reference record. Identity = `code`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRecord {
    pub code: String,
    pub name: String,
    pub class: InstrumentClass,
    pub board: Board,
    pub isin: String,
    pub listing_date: Option<NaiveDate>,
    pub industry: Option<String>,
}

/// The full security master, held in canonical order.
#[derive(Debug, Clone, Default)]
pub struct SecurityMaster {
    records: Vec<SecurityRecord>,
}

impl SecurityMaster {
    /// Build a master from records, sorting into canonical
    /// (class, board) order. The sort is stable, so scrape order is
    /// preserved within each group.
    pub fn new(mut records: Vec<SecurityRecord>) -> Self {
        records.sort_by_key(|r| (r.class.order(), r.board.order()));
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[SecurityRecord] {
        &self.records
    }

    /// Security codes in canonical iteration order.
    pub fn codes(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.code.as_str()).collect()
    }

    /// Load the master from its Parquet table.
    pub fn load(path: &Path) -> Result<Self, MasterError> {
        if !path.exists() {
            return Err(MasterError::NotFound(path.display().to_string()));
        }
        let file = fs::File::open(path).map_err(|e| MasterError::Io(format!("open: {e}")))?;
        let df = ParquetReader::new(file)
            .finish()
            .map_err(|e| MasterError::Parquet(format!("read: {e}")))?;

        let str_col = |name: &str| -> Result<Vec<Option<String>>, MasterError> {
            let ca = df
                .column(name)
                .map_err(|e| MasterError::Parquet(format!("missing column '{name}': {e}")))?
                .str()
                .map_err(|e| MasterError::Parquet(format!("column '{name}' type: {e}")))?;
            Ok(ca.into_iter().map(|v| v.map(str::to_string)).collect())
        };

        let codes = str_col("code")?;
        let names = str_col("name")?;
        let classes = str_col("class")?;
        let boards = str_col("board")?;
        let isins = str_col("isin")?;
        let listing_dates = str_col("listing_date")?;
        let industries = str_col("industry")?;

        let mut records = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let required = |v: &[Option<String>], name: &str| {
                v[i].clone()
                    .ok_or_else(|| MasterError::Parquet(format!("null '{name}' at row {i}")))
            };
            records.push(SecurityRecord {
                code: required(&codes, "code")?,
                name: required(&names, "name")?,
                class: InstrumentClass::parse(&required(&classes, "class")?)?,
                board: Board::parse(&required(&boards, "board")?)?,
                isin: required(&isins, "isin")?,
                listing_date: listing_dates[i]
                    .as_deref()
                    .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()),
                industry: industries[i].clone(),
            });
        }

        Ok(Self::new(records))
    }

    /// Save the master as a Parquet table (atomic tmp + rename).
    pub fn save(&self, path: &Path) -> Result<(), MasterError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| MasterError::Io(format!("create dir: {e}")))?;
        }

        let codes: Vec<&str> = self.records.iter().map(|r| r.code.as_str()).collect();
        let names: Vec<&str> = self.records.iter().map(|r| r.name.as_str()).collect();
        let classes: Vec<&str> = self.records.iter().map(|r| r.class.label()).collect();
        let boards: Vec<&str> = self.records.iter().map(|r| r.board.label()).collect();
        let isins: Vec<&str> = self.records.iter().map(|r| r.isin.as_str()).collect();
        let listing_dates: Vec<Option<String>> = self
            .records
            .iter()
            .map(|r| r.listing_date.map(|d| d.format("%Y-%m-%d").to_string()))
            .collect();
        let industries: Vec<Option<&str>> =
            self.records.iter().map(|r| r.industry.as_deref()).collect();

        let mut df = DataFrame::new(vec![
            Column::new("code".into(), codes),
            Column::new("name".into(), names),
            Column::new("class".into(), classes),
            Column::new("board".into(), boards),
            Column::new("isin".into(), isins),
            Column::new("listing_date".into(), listing_dates),
            Column::new("industry".into(), industries),
        ])
        .map_err(|e| MasterError::Parquet(format!("dataframe creation: {e}")))?;

        let tmp_path = path.with_extension("parquet.tmp");
        let file = fs::File::create(&tmp_path)
            .map_err(|e| MasterError::Io(format!("create file: {e}")))?;
        ParquetWriter::new(file)
            .finish(&mut df)
            .map_err(|e| MasterError::Parquet(format!("write: {e}")))?;

        fs::rename(&tmp_path, path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            MasterError::Io(format!("atomic rename failed: {e}"))
        })?;

        Ok(())
    }
}
