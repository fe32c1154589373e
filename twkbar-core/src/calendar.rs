//! Trading calendar — ordered session dates with a position index.
//!
//! The reconciliation engine defines adjacency by *position* in the
//! calendar, never by calendar-day arithmetic: two trading days with a
//! weekend or holiday between them are adjacent. The position index
//! makes membership and position lookups O(1).
//!
//! The calendar file is rebuilt offline (`twkbar calendar build`) from a
//! weekday schedule and a manually curated exception table: unscheduled
//! closures (typhoon days, national holidays) removed, make-up sessions
//! added.

use chrono::{Datelike, NaiveDate, Weekday};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar file not found: {0}")]
    NotFound(String),

    #[error("calendar I/O error: {0}")]
    Io(String),

    #[error("calendar parquet error: {0}")]
    Parquet(String),

    #[error("invalid calendar span: start {start} is after end {end}")]
    InvalidSpan { start: NaiveDate, end: NaiveDate },
}

/// Manually curated schedule exceptions.
///
/// `closures` are weekdays with no session (unscheduled typhoon closures
/// and national holidays); `makeup_sessions` are weekend dates that
/// traded anyway. Both lists are maintained by hand and loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalendarExceptions {
    #[serde(default)]
    pub closures: Vec<NaiveDate>,
    #[serde(default)]
    pub makeup_sessions: Vec<NaiveDate>,
}

impl CalendarExceptions {
    /// Load an exception table from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, CalendarError> {
        let content = fs::read_to_string(path)
            .map_err(|e| CalendarError::Io(format!("read exceptions file: {e}")))?;
        toml::from_str(&content)
            .map_err(|e| CalendarError::Io(format!("parse exceptions TOML: {e}")))
    }

    /// Known unscheduled closures for the Taiwan market.
    ///
    /// Typhoon days only; regular national holidays must come from the
    /// maintained exceptions file.
    pub fn default_tw() -> Self {
        let closures = [
            "2019-08-09",
            "2019-09-30",
            "2023-08-03",
            "2024-07-24",
            "2024-07-25",
            "2024-10-02",
            "2024-10-03",
            "2024-10-31",
        ]
        .iter()
        .map(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap())
        .collect();

        Self {
            closures,
            makeup_sessions: Vec::new(),
        }
    }
}

/// An ordered, duplicate-free sequence of trading dates.
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    dates: Vec<NaiveDate>,
    index: HashMap<NaiveDate, usize>,
}

impl TradingCalendar {
    /// Build a calendar from an arbitrary date collection.
    ///
    /// Sorts and dedups, then builds the position index. The result is
    /// strictly increasing by construction.
    pub fn from_dates(mut dates: Vec<NaiveDate>) -> Self {
        dates.sort_unstable();
        dates.dedup();
        let index = dates.iter().enumerate().map(|(i, d)| (*d, i)).collect();
        Self { dates, index }
    }

    /// Build session dates for a span: weekdays, minus curated closures,
    /// plus curated make-up sessions.
    pub fn build_sessions(
        start: NaiveDate,
        end: NaiveDate,
        exceptions: &CalendarExceptions,
    ) -> Result<Self, CalendarError> {
        if start > end {
            return Err(CalendarError::InvalidSpan { start, end });
        }

        let mut dates = Vec::new();
        let mut day = start;
        while day <= end {
            let weekday = !matches!(day.weekday(), Weekday::Sat | Weekday::Sun);
            let session = if weekday {
                !exceptions.closures.contains(&day)
            } else {
                exceptions.makeup_sessions.contains(&day)
            };
            if session {
                dates.push(day);
            }
            day = day.succ_opt().expect("date overflow");
        }

        Ok(Self::from_dates(dates))
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.index.contains_key(&date)
    }

    /// Position of a date in the calendar, if it is a session.
    pub fn position(&self, date: NaiveDate) -> Option<usize> {
        self.index.get(&date).copied()
    }

    pub fn first(&self) -> Option<NaiveDate> {
        self.dates.first().copied()
    }

    pub fn last(&self) -> Option<NaiveDate> {
        self.dates.last().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.dates.iter().copied()
    }

    /// Sub-calendar restricted to `[start, end]` inclusive.
    pub fn restrict(&self, start: NaiveDate, end: NaiveDate) -> Self {
        let dates = self
            .dates
            .iter()
            .copied()
            .filter(|d| *d >= start && *d <= end)
            .collect();
        Self::from_dates(dates)
    }

    /// Load a calendar from a Parquet date table.
    pub fn load(path: &Path) -> Result<Self, CalendarError> {
        if !path.exists() {
            return Err(CalendarError::NotFound(path.display().to_string()));
        }
        let file =
            fs::File::open(path).map_err(|e| CalendarError::Io(format!("open: {e}")))?;
        let df = ParquetReader::new(file)
            .finish()
            .map_err(|e| CalendarError::Parquet(format!("read: {e}")))?;

        let dates_col = df
            .column("date")
            .map_err(|e| CalendarError::Parquet(format!("missing 'date' column: {e}")))?;
        let date_ca = dates_col
            .date()
            .map_err(|e| CalendarError::Parquet(format!("'date' column type: {e}")))?;

        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        let mut dates = Vec::with_capacity(df.height());
        for i in 0..df.height() {
            let days = date_ca
                .get(i)
                .ok_or_else(|| CalendarError::Parquet(format!("null date at row {i}")))?;
            dates.push(epoch + chrono::Duration::days(days as i64));
        }

        Ok(Self::from_dates(dates))
    }

    /// Save the calendar as a Parquet date table (atomic tmp + rename).
    pub fn save(&self, path: &Path) -> Result<(), CalendarError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CalendarError::Io(format!("create dir: {e}")))?;
        }

        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        let days: Vec<i32> = self
            .dates
            .iter()
            .map(|d| (*d - epoch).num_days() as i32)
            .collect();

        let mut df = DataFrame::new(vec![Column::new("date".into(), days)
            .cast(&DataType::Date)
            .map_err(|e| CalendarError::Parquet(format!("date cast: {e}")))?])
        .map_err(|e| CalendarError::Parquet(format!("dataframe creation: {e}")))?;

        let tmp_path = path.with_extension("parquet.tmp");
        let file = fs::File::create(&tmp_path)
            .map_err(|e| CalendarError::Io(format!("create file: {e}")))?;
        ParquetWriter::new(file)
            .finish(&mut df)
            .map_err(|e| CalendarError::Parquet(format!("write: {e}")))?;

        fs::rename(&tmp_path, path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            CalendarError::Io(format!("atomic rename failed: {e}"))
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn from_dates_sorts_and_dedups() {
        let cal = TradingCalendar::from_dates(vec![
            d("2024-12-03"),
            d("2024-12-02"),
            d("2024-12-02"),
            d("2024-12-04"),
        ]);
        assert_eq!(cal.len(), 3);
        assert_eq!(cal.first(), Some(d("2024-12-02")));
        assert_eq!(cal.last(), Some(d("2024-12-04")));
        assert_eq!(cal.position(d("2024-12-03")), Some(1));
    }

    #[test]
    fn build_sessions_skips_weekends() {
        // 2024-12-06 is a Friday; 07/08 are the weekend.
        let cal = TradingCalendar::build_sessions(
            d("2024-12-05"),
            d("2024-12-10"),
            &CalendarExceptions::default(),
        )
        .unwrap();
        let dates: Vec<_> = cal.iter().collect();
        assert_eq!(
            dates,
            vec![d("2024-12-05"), d("2024-12-06"), d("2024-12-09"), d("2024-12-10")]
        );
    }

    #[test]
    fn build_sessions_removes_closures() {
        // 2024-10-02/03 were typhoon closures.
        let cal = TradingCalendar::build_sessions(
            d("2024-10-01"),
            d("2024-10-04"),
            &CalendarExceptions::default_tw(),
        )
        .unwrap();
        let dates: Vec<_> = cal.iter().collect();
        assert_eq!(dates, vec![d("2024-10-01"), d("2024-10-04")]);
    }

    #[test]
    fn build_sessions_adds_makeup_days() {
        // Saturday make-up session.
        let exceptions = CalendarExceptions {
            closures: vec![],
            makeup_sessions: vec![d("2024-12-07")],
        };
        let cal =
            TradingCalendar::build_sessions(d("2024-12-06"), d("2024-12-09"), &exceptions)
                .unwrap();
        let dates: Vec<_> = cal.iter().collect();
        assert_eq!(dates, vec![d("2024-12-06"), d("2024-12-07"), d("2024-12-09")]);
    }

    #[test]
    fn build_sessions_rejects_inverted_span() {
        let err = TradingCalendar::build_sessions(
            d("2024-12-10"),
            d("2024-12-05"),
            &CalendarExceptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, CalendarError::InvalidSpan { .. }));
    }

    #[test]
    fn restrict_keeps_span() {
        let cal = TradingCalendar::from_dates(vec![
            d("2024-12-02"),
            d("2024-12-03"),
            d("2024-12-04"),
            d("2024-12-05"),
        ]);
        let sub = cal.restrict(d("2024-12-03"), d("2024-12-04"));
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.position(d("2024-12-03")), Some(0));
        assert!(!sub.contains(d("2024-12-02")));
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tradingdays.parquet");
        let cal =
            TradingCalendar::from_dates(vec![d("2024-12-02"), d("2024-12-03"), d("2024-12-04")]);

        cal.save(&path).unwrap();
        let loaded = TradingCalendar::load(&path).unwrap();

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.position(d("2024-12-04")), Some(2));
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = TradingCalendar::load(&dir.path().join("nope.parquet")).unwrap_err();
        assert!(matches!(err, CalendarError::NotFound(_)));
    }

    #[test]
    fn exceptions_toml_roundtrip() {
        let toml_str = r#"
closures = ["2024-10-02", "2024-10-03"]
makeup_sessions = ["2024-12-07"]
"#;
        let exceptions: CalendarExceptions = toml::from_str(toml_str).unwrap();
        assert_eq!(exceptions.closures.len(), 2);
        assert_eq!(exceptions.makeup_sessions, vec![d("2024-12-07")]);
    }
}
