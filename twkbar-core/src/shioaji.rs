//! Brokerage market-data client (Shioaji HTTP bridge).
//!
//! Exchanges an API key/secret for a session token, pulls minute kbars
//! as columnar arrays per date range, and reads the metered usage
//! counter. A fixed courtesy pause follows every kbars round-trip to
//! stay under the provider's request-rate policy.
//!
//! There is no transport retry: a failed window is abandoned for this
//! run and rediscovered as still missing by the next gap analysis.

use crate::bars::BarRow;
use crate::provider::{BarSource, SourceError};
use chrono::{NaiveDate, TimeZone};
use chrono_tz::Asia::Taipei;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Connection settings for the brokerage bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShioajiConfig {
    pub base_url: String,
    pub api_key: String,
    pub secret_key: String,
    /// Paper-trading session; never defaults to a live session.
    #[serde(default = "default_simulation")]
    pub simulation: bool,
    /// Courtesy pause after every kbars call, in milliseconds.
    #[serde(default = "default_pause_ms")]
    pub pause_ms: u64,
}

fn default_simulation() -> bool {
    true
}

fn default_pause_ms() -> u64 {
    250
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    api_key: &'a str,
    secret_key: &'a str,
    simulation: bool,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

/// Columnar kbars payload: parallel arrays indexed by bar.
#[derive(Debug, Deserialize)]
struct KbarsResponse {
    ts: Vec<i64>,
    #[serde(rename = "Open")]
    open: Vec<f64>,
    #[serde(rename = "High")]
    high: Vec<f64>,
    #[serde(rename = "Low")]
    low: Vec<f64>,
    #[serde(rename = "Close")]
    close: Vec<f64>,
    #[serde(rename = "Volume")]
    volume: Vec<u64>,
    #[serde(rename = "Amount")]
    amount: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct UsageResponse {
    remaining_bytes: u64,
}

/// Blocking HTTP client for the brokerage market-data bridge.
pub struct ShioajiClient {
    client: reqwest::blocking::Client,
    config: ShioajiConfig,
    token: Mutex<Option<String>>,
}

impl ShioajiClient {
    pub fn new(config: ShioajiConfig) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self { client, config, token: Mutex::new(None) }
    }

    /// Log in and cache the session token. Must be called once before
    /// any fetch; an authentication failure here halts the whole batch.
    pub fn login(&self) -> Result<(), SourceError> {
        let url = format!("{}/api/v1/token", self.config.base_url);
        let body = LoginRequest {
            api_key: &self.config.api_key,
            secret_key: &self.config.secret_key,
            simulation: self.config.simulation,
        };

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(SourceError::AuthenticationFailed(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
                detail: "login".into(),
            });
        }

        let login: LoginResponse = resp
            .json()
            .map_err(|e| SourceError::ResponseFormatChanged(format!("login response: {e}")))?;

        *self.token.lock().unwrap() = Some(login.token);
        debug!(simulation = self.config.simulation, "session established");
        Ok(())
    }

    fn token(&self) -> Result<String, SourceError> {
        self.token
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SourceError::AuthenticationFailed("not logged in".into()))
    }

    fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        what: &str,
    ) -> Result<T, SourceError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(self.token()?)
            .send()
            .map_err(|e| SourceError::Network(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(SourceError::AuthenticationFailed("session expired".into()));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::SecurityNotFound { code: what.to_string() });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(SourceError::RateLimited { retry_after_secs: retry_after });
        }
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
                detail: what.to_string(),
            });
        }

        resp.json()
            .map_err(|e| SourceError::ResponseFormatChanged(format!("{what}: {e}")))
    }
}

/// Convert a columnar kbars payload into rows, timestamps anchored to
/// exchange-local (Asia/Taipei) time, sorted ascending.
fn parse_kbars(code: &str, kbars: KbarsResponse) -> Result<Vec<BarRow>, SourceError> {
    let n = kbars.ts.len();
    for (name, len) in [
        ("Open", kbars.open.len()),
        ("High", kbars.high.len()),
        ("Low", kbars.low.len()),
        ("Close", kbars.close.len()),
        ("Volume", kbars.volume.len()),
        ("Amount", kbars.amount.len()),
    ] {
        if len != n {
            return Err(SourceError::ResponseFormatChanged(format!(
                "kbars for {code}: '{name}' has {len} entries, expected {n}"
            )));
        }
    }

    let mut bars = Vec::with_capacity(n);
    for i in 0..n {
        let ms = kbars.ts[i];
        let ts = Taipei
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| {
                SourceError::ResponseFormatChanged(format!(
                    "kbars for {code}: invalid timestamp {ms}"
                ))
            })?
            .naive_local();

        bars.push(BarRow {
            ts,
            open: kbars.open[i],
            high: kbars.high[i],
            low: kbars.low[i],
            close: kbars.close[i],
            volume: kbars.volume[i],
            amount: kbars.amount[i],
        });
    }

    bars.sort_by_key(|b| b.ts);
    Ok(bars)
}

impl BarSource for ShioajiClient {
    fn name(&self) -> &str {
        "shioaji"
    }

    fn fetch(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<BarRow>, SourceError> {
        let url = format!(
            "{}/api/v1/kbars?code={code}&start={start}&end={end}",
            self.config.base_url
        );

        let result = self.get_json::<KbarsResponse>(&url, code);
        // Courtesy pause after every round-trip, success or not.
        std::thread::sleep(Duration::from_millis(self.config.pause_ms));

        parse_kbars(code, result?)
    }

    fn remaining_bytes(&self) -> Result<u64, SourceError> {
        let url = format!("{}/api/v1/usage", self.config.base_url);
        let usage: UsageResponse = self.get_json(&url, "usage")?;
        Ok(usage.remaining_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(ts: Vec<i64>) -> KbarsResponse {
        let n = ts.len();
        KbarsResponse {
            ts,
            open: vec![600.0; n],
            high: vec![601.0; n],
            low: vec![599.0; n],
            close: vec![600.5; n],
            volume: vec![1_000; n],
            amount: vec![600_500.0; n],
        }
    }

    #[test]
    fn kbars_timestamps_are_taipei_local() {
        // 2024-12-02 01:01 UTC == 09:01 in Taipei.
        let ms = chrono::NaiveDate::from_ymd_opt(2024, 12, 2)
            .unwrap()
            .and_hms_opt(1, 1, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();

        let bars = parse_kbars("2330", payload(vec![ms])).unwrap();

        assert_eq!(bars.len(), 1);
        assert_eq!(
            bars[0].ts,
            chrono::NaiveDate::from_ymd_opt(2024, 12, 2)
                .unwrap()
                .and_hms_opt(9, 1, 0)
                .unwrap()
        );
    }

    #[test]
    fn kbars_are_sorted_ascending() {
        let base = chrono::NaiveDate::from_ymd_opt(2024, 12, 2)
            .unwrap()
            .and_hms_opt(1, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();

        let bars = parse_kbars("2330", payload(vec![base + 120_000, base, base + 60_000])).unwrap();

        assert!(bars.windows(2).all(|p| p[0].ts < p[1].ts));
    }

    #[test]
    fn mismatched_column_lengths_are_a_format_error() {
        let mut kbars = payload(vec![0, 60_000]);
        kbars.close.pop();

        let err = parse_kbars("2330", kbars).unwrap_err();
        assert!(matches!(err, SourceError::ResponseFormatChanged(_)));
    }

    #[test]
    fn empty_payload_parses_to_no_bars() {
        let bars = parse_kbars("2330", payload(vec![])).unwrap();
        assert!(bars.is_empty());
    }
}
