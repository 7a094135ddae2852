//! CLI argument definitions for the Waterlog application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use clap::{Parser, Subcommand};

/// Longest `history` window accepted, roughly a century.
pub const MAX_HISTORY_DAYS: i64 = 36_600;

/// Longest `monthly` window accepted.
pub const MAX_HISTORY_MONTHS: i64 = 1_200;

/// Record what you drink and watch today's total.
#[derive(Parser, Debug)]
#[command(name = "waterlog", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the database file.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Record an intake.
    Add {
        /// Amount in milliliters.
        amount: u32,
        /// When it happened (RFC 3339). Defaults to now.
        #[arg(long = "at")]
        at: Option<DateTime<Utc>>,
        /// Explicit id; fails if already taken.
        #[arg(long = "id")]
        id: Option<i64>,
    },
    /// Delete an intake by id.
    Delete {
        id: i64,
    },
    /// List all intakes, most recent first.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Show today's total against the daily goal.
    Today,
    /// Show per-day totals.
    History {
        /// Number of days to include, ending today.
        #[arg(
            long,
            default_value_t = 7,
            value_parser = clap::value_parser!(u32).range(1..=MAX_HISTORY_DAYS)
        )]
        days: u32,
    },
    /// Show per-month totals.
    Monthly {
        /// Number of months to include, ending with the current one.
        #[arg(
            long,
            default_value_t = 12,
            value_parser = clap::value_parser!(u32).range(1..=MAX_HISTORY_MONTHS)
        )]
        months: u32,
    },
    /// Set the daily goal and save it to the configuration file.
    Goal {
        /// Goal in milliliters.
        ml: u32,
    },
    /// Print the history and today's total every time they change.
    Watch,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > WATERLOG_CONFIG env var > platform default (~/.waterlog/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("WATERLOG_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the data directory path.
    ///
    /// Returns `None` if not overridden (use config value).
    pub fn resolve_data_dir(&self) -> Option<String> {
        self.data_dir
            .as_ref()
            .map(|p| p.to_string_lossy().to_string())
    }

    /// Resolve the log level.
    ///
    /// Returns `None` if not overridden (use config value).
    pub fn resolve_log_level(&self) -> Option<String> {
        self.log_level.clone()
    }
}

/// Inclusive day range covering the last `days` days up to `today`.
///
/// `None` when the range would start before the earliest representable date.
pub fn history_window(days: u32, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let back = u64::from(days.max(1)) - 1;
    let from = today.checked_sub_days(Days::new(back))?;
    Some((from, today))
}

/// Inclusive day range covering the last `months` calendar months, from the
/// first day of the earliest month up to `today`.
pub fn monthly_window(months: u32, today: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
    let back = months.max(1) - 1;
    let from = waterlog_core::types::month_start(today).checked_sub_months(Months::new(back))?;
    Some((from, today))
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".waterlog").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".waterlog").join("config.toml");
    }
    PathBuf::from("config.toml")
}
