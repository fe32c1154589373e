//! Remote bar source trait and structured error types.
//!
//! `BarSource` abstracts over the brokerage market-data connection so
//! the sync engine can be driven by a scripted source in tests. The
//! store sits above this trait — sources know nothing about local files.

use crate::bars::BarRow;
use chrono::NaiveDate;
use thiserror::Error;

/// Structured error types for remote data operations.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("network unreachable: {0}")]
    Network(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("security not found: {code}")]
    SecurityNotFound { code: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("HTTP {status} from provider: {detail}")]
    Http { status: u16, detail: String },

    #[error("source error: {0}")]
    Other(String),
}

impl SourceError {
    /// Authentication failures halt the whole batch; everything else is
    /// a per-security skip.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SourceError::AuthenticationFailed(_))
    }
}

/// A metered remote source of minute bars.
///
/// `fetch` is all-or-nothing for a window: failures are errors, never
/// partial results. Every fetch consumes provider usage budget, which
/// `remaining_bytes` reports without side effects.
pub trait BarSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Fetch minute bars for a security over an inclusive date range.
    fn fetch(
        &self,
        code: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<BarRow>, SourceError>;

    /// Remaining usage budget in bytes. Side-effect-free read.
    fn remaining_bytes(&self) -> Result<u64, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_auth_failures_are_fatal() {
        assert!(SourceError::AuthenticationFailed("bad key".into()).is_fatal());
        assert!(!SourceError::Network("timeout".into()).is_fatal());
        assert!(!SourceError::SecurityNotFound { code: "2330".into() }.is_fatal());
        assert!(!SourceError::RateLimited { retry_after_secs: 60 }.is_fatal());
    }
}
