//! twkbar CLI — incremental Taiwan minute-bar history.
//!
//! Commands:
//! - `sync` — gap-fill the per-security bar tables against the calendar
//! - `calendar build` — rebuild the trading-day table from the weekday
//!   schedule and the curated exception list
//! - `master fetch` — rebuild the security master from the exchange
//!   ISIN pages
//! - `status` — report which securities are stored and their spans
//!
//! Exit codes: 0 = batch completed (per-security skips allowed),
//! 1 = halted early (budget exhausted or authentication failure).

mod config;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use twkbar_core::{
    sync_universe, BarStore, CalendarExceptions, HaltReason, IsinScraper, SecurityMaster,
    ShioajiClient, SyncOptions, TradingCalendar,
};

#[derive(Parser)]
#[command(name = "twkbar", about = "Incremental 1-minute bar history for Taiwan-listed stocks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Gap-fill stored bar tables against the trading calendar.
    Sync {
        /// Path to the TOML config file.
        #[arg(long, default_value = "twkbar.toml")]
        config: PathBuf,

        /// Override the configured start date (YYYY-MM-DD).
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Override the configured end date (YYYY-MM-DD).
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Skip this many securities from the front of the universe.
        #[arg(long, default_value_t = 0)]
        offset: usize,

        /// Process at most this many securities.
        #[arg(long)]
        limit: Option<usize>,

        /// Sync only these codes instead of the whole master.
        codes: Vec<String>,
    },
    /// Trading-calendar commands.
    Calendar {
        #[command(subcommand)]
        action: CalendarAction,
    },
    /// Security-master commands.
    Master {
        #[command(subcommand)]
        action: MasterAction,
    },
    /// Report stored-table status for securities.
    Status {
        /// Path to the TOML config file.
        #[arg(long, default_value = "twkbar.toml")]
        config: PathBuf,

        /// Codes to report on; defaults to the whole master.
        codes: Vec<String>,
    },
}

#[derive(Subcommand)]
enum CalendarAction {
    /// Rebuild the trading-day table for the configured span.
    Build {
        /// Path to the TOML config file.
        #[arg(long, default_value = "twkbar.toml")]
        config: PathBuf,

        /// TOML file with curated closures and make-up sessions.
        /// Defaults to the built-in Taiwan closure list.
        #[arg(long)]
        exceptions: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum MasterAction {
    /// Rebuild the security master from the exchange ISIN pages.
    Fetch {
        /// Path to the TOML config file.
        #[arg(long, default_value = "twkbar.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("twkbar={0},twkbar_core={0}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Sync { config, start, end, offset, limit, codes } => {
            run_sync(&config, start, end, offset, limit, codes)
        }
        Commands::Calendar { action } => match action {
            CalendarAction::Build { config, exceptions } => {
                run_calendar_build(&config, exceptions.as_deref())
            }
        },
        Commands::Master { action } => match action {
            MasterAction::Fetch { config } => run_master_fetch(&config),
        },
        Commands::Status { config, codes } => run_status(&config, codes),
    }
}

fn run_sync(
    config_path: &std::path::Path,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    offset: usize,
    limit: Option<usize>,
    codes: Vec<String>,
) -> Result<()> {
    let config = Config::from_file(config_path)?;
    let start = start.unwrap_or(config.start_date);
    let end = end.unwrap_or_else(|| config.end_date());

    let calendar = TradingCalendar::load(&config.calendar_path)?.restrict(start, end);
    tracing::info!(sessions = calendar.len(), %start, %end, "calendar loaded");

    let codes: Vec<String> = if codes.is_empty() {
        let master = SecurityMaster::load(&config.master_path)?;
        master.codes().into_iter().map(String::from).collect()
    } else {
        codes
    };
    let code_refs: Vec<&str> = codes
        .iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .map(String::as_str)
        .collect();
    tracing::info!(securities = code_refs.len(), offset, "universe selected");

    let client = ShioajiClient::new(config.api.clone());
    if let Err(e) = client.login() {
        eprintln!("login failed: {e}");
        std::process::exit(1);
    }

    let store = BarStore::new(&config.data_dir);
    let opts = SyncOptions { start, end, budget_floor_bytes: config.budget_floor_bytes };

    let summary = sync_universe(&client, &store, &calendar, &code_refs, &opts);

    for (code, err) in &summary.skipped {
        eprintln!("skipped {code}: {err}");
    }

    if let Some(reason) = &summary.halted {
        match reason {
            HaltReason::BudgetExhausted { remaining, floor } => {
                eprintln!("halted: usage budget exhausted ({remaining} bytes left, floor {floor})");
            }
            HaltReason::BudgetUnknown { detail } => {
                eprintln!("halted: cannot read usage budget: {detail}");
            }
            HaltReason::AuthenticationFailed { detail } => {
                eprintln!("halted: authentication failed: {detail}");
            }
        }
        std::process::exit(1);
    }

    println!(
        "synced {} securities: {} full fetches, {} updated, {} up to date, {} skipped",
        summary.processed,
        summary.full_fetches,
        summary.updated,
        summary.up_to_date,
        summary.skipped.len()
    );
    Ok(())
}

fn run_calendar_build(
    config_path: &std::path::Path,
    exceptions_path: Option<&std::path::Path>,
) -> Result<()> {
    let config = Config::from_file(config_path)?;
    let exceptions = match exceptions_path {
        Some(path) => CalendarExceptions::from_file(path)?,
        None => CalendarExceptions::default_tw(),
    };

    let calendar =
        TradingCalendar::build_sessions(config.start_date, config.end_date(), &exceptions)?;
    calendar.save(&config.calendar_path)?;

    println!(
        "wrote {} sessions ({} to {}) to {}",
        calendar.len(),
        config.start_date,
        config.end_date(),
        config.calendar_path.display()
    );
    Ok(())
}

fn run_master_fetch(config_path: &std::path::Path) -> Result<()> {
    let config = Config::from_file(config_path)?;

    let scraper = IsinScraper::default();
    let master = scraper.fetch_master()?;
    if master.is_empty() {
        bail!("ISIN pages yielded no securities — refusing to overwrite the master");
    }
    master.save(&config.master_path)?;

    println!(
        "wrote {} securities to {}",
        master.len(),
        config.master_path.display()
    );
    Ok(())
}

fn run_status(config_path: &std::path::Path, codes: Vec<String>) -> Result<()> {
    let config = Config::from_file(config_path)?;

    let codes: Vec<String> = if codes.is_empty() {
        let master = SecurityMaster::load(&config.master_path)?;
        master.codes().into_iter().map(String::from).collect()
    } else {
        codes
    };
    let code_refs: Vec<&str> = codes.iter().map(String::as_str).collect();

    let store = BarStore::new(&config.data_dir);
    let mut present = 0usize;
    for status in store.status(&code_refs) {
        if status.present {
            present += 1;
            println!(
                "{}  {} to {}  {} bars",
                status.code,
                status.start.map(|d| d.to_string()).unwrap_or_else(|| "?".into()),
                status.end.map(|d| d.to_string()).unwrap_or_else(|| "?".into()),
                status.bar_count.map(|n| n.to_string()).unwrap_or_else(|| "?".into()),
            );
        } else {
            println!("{}  (not stored)", status.code);
        }
    }
    println!("\n{present}/{} securities stored under {}", code_refs.len(), config.data_dir.display());
    Ok(())
}
