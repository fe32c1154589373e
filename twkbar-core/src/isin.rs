//! TWSE ISIN page scraper — rebuilds the security master offline.
//!
//! The exchange publishes one Big5-encoded HTML table per listing board
//! (strMode 2 = listed, 4 = OTC, 5 = emerging). Each data row carries
//! "code␣name" (full-width space), ISIN, listing date, market, industry,
//! and CFI code. Rows whose CFI prefix falls outside the tracked
//! instrument classes (warrants, bonds, ...) are dropped.

use crate::securities::{Board, InstrumentClass, SecurityMaster, SecurityRecord};
use chrono::NaiveDate;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum IsinError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("page structure changed: {0}")]
    PageFormatChanged(String),
}

const BOARDS: [(Board, u8); 3] = [(Board::Twse, 2), (Board::Tpex, 4), (Board::Emerging, 5)];

/// Scraper for the exchange ISIN pages.
pub struct IsinScraper {
    client: reqwest::blocking::Client,
    base_url: String,
}

impl Default for IsinScraper {
    fn default() -> Self {
        Self::new("https://isin.twse.com.tw")
    }
}

impl IsinScraper {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .expect("failed to build HTTP client");

        Self { client, base_url: base_url.into() }
    }

    /// Fetch all three board pages and assemble the security master.
    pub fn fetch_master(&self) -> Result<SecurityMaster, IsinError> {
        let mut records = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();

        for (board, str_mode) in BOARDS {
            let url = format!("{}/isin/C_public.jsp?strMode={str_mode}", self.base_url);
            debug!(%board, %url, "fetching ISIN page");

            let resp = self.client.get(&url).send()?.error_for_status()?;
            // The page declares no charset in its headers.
            let html = resp.text_with_charset("big5")?;

            let board_records = parse_board_page(&html, board)?;
            info!(%board, count = board_records.len(), "parsed ISIN page");

            for record in board_records {
                // Same dedup key as the source table: code+name, ISIN.
                if seen.insert((record.code.clone(), record.isin.clone())) {
                    records.push(record);
                }
            }
        }

        Ok(SecurityMaster::new(records))
    }
}

/// Parse one board page into records. Pure function, testable offline.
pub fn parse_board_page(html: &str, board: Board) -> Result<Vec<SecurityRecord>, IsinError> {
    let document = Html::parse_document(html);
    let table_sel = Selector::parse("table").expect("static selector");
    let row_sel = Selector::parse("tr").expect("static selector");
    let cell_sel = Selector::parse("td").expect("static selector");

    let mut records = Vec::new();
    let mut saw_table = false;

    for table in document.select(&table_sel) {
        for row in table.select(&row_sel) {
            saw_table = true;
            let cells: Vec<String> = row
                .select(&cell_sel)
                .map(|td| td.text().collect::<String>().trim().to_string())
                .collect();

            // Header and section-divider rows have fewer cells.
            if cells.len() < 6 {
                continue;
            }

            let code_and_name = &cells[0];
            let isin = &cells[1];
            if code_and_name.is_empty() || isin.is_empty() {
                continue;
            }

            // "2330　台積電" — code and name separated by the first
            // whitespace (usually full-width U+3000).
            let Some((code, name)) = code_and_name.split_once(char::is_whitespace) else {
                continue;
            };
            let (code, name) = (code.trim(), name.trim());
            if code.is_empty() || name.is_empty() {
                continue;
            }

            let cfi = cells.get(5).map(String::as_str).unwrap_or("");
            let Some(class) = InstrumentClass::from_cfi(cfi) else {
                continue;
            };

            let listing_date = NaiveDate::parse_from_str(&cells[2], "%Y/%m/%d").ok();

            let industry = match cells.get(4).map(String::as_str) {
                Some("") | None => Some(class.label().to_string()),
                Some(s) => Some(s.to_string()),
            };

            records.push(SecurityRecord {
                code: code.to_string(),
                name: name.to_string(),
                class,
                board,
                isin: isin.clone(),
                listing_date,
                industry,
            });
        }
    }

    if !saw_table {
        return Err(IsinError::PageFormatChanged("no table rows found".into()));
    }

    Ok(records)
}
