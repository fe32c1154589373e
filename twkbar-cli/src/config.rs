//! Process configuration, loaded once from TOML and passed down by
//! reference — no ambient globals. API credentials may be overridden by
//! `TWKBAR_API_KEY` / `TWKBAR_SECRET_KEY` so the config file can be
//! committed without secrets.

use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use twkbar_core::ShioajiConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding one Parquet table per security.
    pub data_dir: PathBuf,
    /// Trading-calendar Parquet table (rebuilt by `calendar build`).
    pub calendar_path: PathBuf,
    /// Security-master Parquet table (rebuilt by `master fetch`).
    pub master_path: PathBuf,

    /// Configured fetch span. `end_date` defaults to today.
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,

    /// Halt the batch when the provider reports fewer remaining bytes.
    #[serde(default = "default_budget_floor")]
    pub budget_floor_bytes: u64,

    pub api: ShioajiConfig,
}

fn default_budget_floor() -> u64 {
    1_000_000
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("parse config file {}", path.display()))?;

        if let Ok(key) = std::env::var("TWKBAR_API_KEY") {
            config.api.api_key = key;
        }
        if let Ok(secret) = std::env::var("TWKBAR_SECRET_KEY") {
            config.api.secret_key = secret;
        }

        Ok(config)
    }

    /// Effective end of the configured span.
    pub fn end_date(&self) -> NaiveDate {
        self.end_date
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
data_dir = "data/twstk_1mk"
calendar_path = "data/tradingday_list.parquet"
master_path = "data/twstk_info.parquet"
start_date = "2024-12-30"

[api]
base_url = "https://bridge.example.com"
api_key = "key"
secret_key = "secret"
"#;

    #[test]
    fn parses_with_defaults() {
        let config: Config = toml::from_str(SAMPLE).unwrap();
        assert_eq!(config.budget_floor_bytes, 1_000_000);
        assert_eq!(config.end_date, None);
        assert!(config.api.simulation);
        assert_eq!(config.api.pause_ms, 250);
        assert_eq!(
            config.start_date,
            NaiveDate::from_ymd_opt(2024, 12, 30).unwrap()
        );
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("data/twstk_1mk"));
    }
}
