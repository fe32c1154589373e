//! twkbar core — incremental minute-bar history for Taiwan-listed equities.
//!
//! This crate contains everything below the CLI:
//! - Trading calendar (ordered session dates with a position index)
//! - Security master (codes, names, instrument class, listing board)
//! - Bar rows and the last-write-wins merge
//! - The `BarSource` trait and its brokerage HTTP implementation
//! - Per-security Parquet store with atomic writes
//! - Gap reconciliation engine (missing-date grouping into fetch windows)
//! - Budget-gated batch sync driver

pub mod bars;
pub mod calendar;
pub mod gap;
pub mod isin;
pub mod provider;
pub mod securities;
pub mod shioaji;
pub mod store;
pub mod sync;

pub use bars::{merge_bars, BarRow};
pub use calendar::{CalendarError, CalendarExceptions, TradingCalendar};
pub use gap::{group_windows, missing_dates, FetchWindow, GapError};
pub use isin::{IsinError, IsinScraper};
pub use provider::{BarSource, SourceError};
pub use securities::{Board, InstrumentClass, MasterError, SecurityMaster, SecurityRecord};
pub use shioaji::{ShioajiClient, ShioajiConfig};
pub use store::{BarStore, StoreError, TableMeta, TableStatus};
pub use sync::{
    sync_security, sync_universe, BatchSummary, HaltReason, SecurityOutcome, SyncError,
    SyncOptions,
};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types that cross the batch-driver seam are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<BarRow>();
        require_sync::<BarRow>();
        require_send::<TradingCalendar>();
        require_sync::<TradingCalendar>();
        require_send::<FetchWindow>();
        require_sync::<FetchWindow>();
        require_send::<SecurityRecord>();
        require_sync::<SecurityRecord>();
        require_send::<BarStore>();
        require_sync::<BarStore>();
        require_send::<SecurityOutcome>();
        require_sync::<SecurityOutcome>();
        require_send::<BatchSummary>();
        require_sync::<BatchSummary>();
    }
}
