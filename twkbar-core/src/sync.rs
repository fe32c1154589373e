//! Per-security update state machine and the budget-gated batch driver.
//!
//! One security at a time, one fetch window at a time, strictly in
//! calendar order. A security with no local table gets a single
//! full-range fetch; an existing table goes through gap analysis
//! against the trading calendar and only the missing windows are
//! re-fetched. The merged table is persisted after **every** window so
//! a later window's failure loses at most the in-flight window.
//!
//! The driver checks the shared usage budget before each security and
//! halts the whole batch cooperatively when it drops below the floor.
//! Per-security failures are logged and skipped; only authentication
//! failures and the budget gate stop the run.

use crate::bars::{merge_bars, BarRow};
use crate::calendar::TradingCalendar;
use crate::gap::{group_windows, missing_dates, GapError};
use crate::provider::{BarSource, SourceError};
use crate::store::{BarStore, StoreError};
use chrono::NaiveDate;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Options for one sync run, built once at process start.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Configured span, inclusive. The calendar passed to the driver
    /// must already be restricted to this span.
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// Halt the batch when the provider reports fewer remaining bytes.
    pub budget_floor_bytes: u64,
}

/// Why one security's update could not complete. All variants are
/// per-security recoverable except a fatal source error, which the
/// driver promotes to a batch halt.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gap(#[from] GapError),
}

/// Terminal state of one security's update pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityOutcome {
    /// No local table existed; the whole configured range was fetched.
    FullFetch { bars: usize },
    /// Gap analysis found nothing missing; no remote call was made.
    UpToDate,
    /// Missing windows were fetched and merged.
    Updated { windows: usize, bars: usize },
}

/// Why the batch stopped before the end of the universe.
#[derive(Debug, Clone)]
pub enum HaltReason {
    BudgetExhausted { remaining: u64, floor: u64 },
    /// The budget could not be read; the gate cannot be verified, so
    /// the batch stops rather than spend blind.
    BudgetUnknown { detail: String },
    AuthenticationFailed { detail: String },
}

/// Result of a whole batch run.
#[derive(Debug)]
pub struct BatchSummary {
    pub processed: usize,
    pub full_fetches: usize,
    pub updated: usize,
    pub up_to_date: usize,
    pub skipped: Vec<(String, SyncError)>,
    pub halted: Option<HaltReason>,
}

impl BatchSummary {
    /// True when the run reached the end of the universe (skips allowed).
    pub fn completed(&self) -> bool {
        self.halted.is_none()
    }
}

/// Bring one security's stored table up to date against the calendar.
pub fn sync_security(
    source: &dyn BarSource,
    store: &BarStore,
    calendar: &TradingCalendar,
    code: &str,
    opts: &SyncOptions,
) -> Result<SecurityOutcome, SyncError> {
    if !store.exists(code) {
        let bars = source.fetch(code, opts.start, opts.end)?;
        if bars.is_empty() {
            // Nothing tradable in the span (e.g. suspended). No file is
            // written; the next run will look again.
            warn!(code, "full-range fetch returned no bars");
            return Ok(SecurityOutcome::FullFetch { bars: 0 });
        }
        store.write(code, &bars)?;
        return Ok(SecurityOutcome::FullFetch { bars: bars.len() });
    }

    let existing = store.load(code)?;
    let present: HashSet<NaiveDate> = existing.iter().map(BarRow::date).collect();
    let missing = missing_dates(calendar, &present);

    if missing.is_empty() {
        return Ok(SecurityOutcome::UpToDate);
    }

    let windows = group_windows(&missing, calendar)?;
    debug!(code, missing = missing.len(), windows = windows.len(), "gap analysis");

    let mut table = existing;
    let mut fetched_total = 0usize;
    for window in &windows {
        let fetched = source.fetch(code, window.start, window.end)?;
        if fetched.is_empty() {
            debug!(code, %window, "window returned no bars");
        }
        fetched_total += fetched.len();
        table = merge_bars(table, fetched);
        // Persist per window: a later failure loses only the in-flight
        // window, at the cost of repeated writes.
        store.write(code, &table)?;
        debug!(code, %window, "window merged");
    }

    Ok(SecurityOutcome::Updated { windows: windows.len(), bars: fetched_total })
}

/// Run the whole universe through `sync_security`, gated on the shared
/// usage budget, isolating per-security failures.
pub fn sync_universe(
    source: &dyn BarSource,
    store: &BarStore,
    calendar: &TradingCalendar,
    codes: &[&str],
    opts: &SyncOptions,
) -> BatchSummary {
    let total = codes.len();
    let mut summary = BatchSummary {
        processed: 0,
        full_fetches: 0,
        updated: 0,
        up_to_date: 0,
        skipped: Vec::new(),
        halted: None,
    };

    for (idx, code) in codes.iter().enumerate() {
        // Budget gate, checked between securities only: a window that
        // has started always runs to its merge-and-persist step.
        match source.remaining_bytes() {
            Ok(remaining) if remaining < opts.budget_floor_bytes => {
                warn!(remaining, floor = opts.budget_floor_bytes, "usage budget exhausted, halting batch");
                summary.halted = Some(HaltReason::BudgetExhausted {
                    remaining,
                    floor: opts.budget_floor_bytes,
                });
                break;
            }
            Ok(remaining) => {
                debug!(remaining, "usage budget");
            }
            Err(e) => {
                error!(error = %e, "cannot read usage budget, halting batch");
                summary.halted = Some(HaltReason::BudgetUnknown { detail: e.to_string() });
                break;
            }
        }

        match sync_security(source, store, calendar, code, opts) {
            Ok(SecurityOutcome::FullFetch { bars }) => {
                info!(idx, code, bars, "downloaded full range");
                summary.full_fetches += 1;
            }
            Ok(SecurityOutcome::UpToDate) => {
                info!(idx, code, "up to date");
                summary.up_to_date += 1;
            }
            Ok(SecurityOutcome::Updated { windows, bars }) => {
                info!(idx, code, windows, bars, "updated");
                summary.updated += 1;
            }
            Err(SyncError::Source(e)) if e.is_fatal() => {
                error!(idx, code, error = %e, "authentication failed, halting batch");
                summary.halted = Some(HaltReason::AuthenticationFailed { detail: e.to_string() });
                break;
            }
            Err(e) => {
                // Per-security fault isolation: log and move on.
                error!(idx, code, error = %e, "skipping security");
                summary.skipped.push((code.to_string(), e));
            }
        }
        summary.processed = idx + 1;
    }

    info!(
        processed = summary.processed,
        total,
        full_fetches = summary.full_fetches,
        updated = summary.updated,
        up_to_date = summary.up_to_date,
        skipped = summary.skipped.len(),
        halted = summary.halted.is_some(),
        "batch finished"
    );

    summary
}
