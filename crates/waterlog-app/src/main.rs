//! Waterlog application binary - composition root.
//!
//! 1. Parse CLI arguments and load configuration from TOML
//! 2. Initialize tracing
//! 3. Open the intake store (SQLite)
//! 4. Run the requested command
//! 5. Close the store
//!
//! `goal` only touches the configuration file and never opens the store.

mod cli;

use chrono::Utc;
use clap::Parser;
use tokio_stream::StreamExt;

use waterlog_core::config::{expand_home, WaterlogConfig};
use waterlog_core::error::Result as StoreResult;
use waterlog_core::types::WaterIntake;
use waterlog_storage::IntakeStore;

use cli::{history_window, monthly_window, CliArgs, Command};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config_file = args.resolve_config_path();
    let mut config = WaterlogConfig::load_or_default(&config_file);
    if let Some(data_dir) = args.resolve_data_dir() {
        config.general.data_dir = data_dir;
    }
    if let Some(level) = args.resolve_log_level() {
        config.general.log_level = level;
    }

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.general.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(path = %config_file.display(), "Configuration resolved");

    if let Command::Goal { ml } = args.command {
        // Reload so CLI overrides are not written back to the file.
        let mut stored = WaterlogConfig::load_or_default(&config_file);
        stored.tracker.daily_goal_ml = ml;
        stored.save(&config_file)?;
        println!("Daily goal set to {}ml", ml);
        return Ok(());
    }

    // Storage.
    let data_dir = expand_home(&config.general.data_dir);
    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(path = %data_dir.display(), error = %e, "Failed to create data directory");
        return Err(e.into());
    }
    let db_path = config.database_path();
    let store = IntakeStore::open(&db_path, &config.storage)?;
    tracing::debug!(path = %db_path.display(), "Intake store opened");

    let outcome = run(&store, &config, args.command).await;
    store.close()?;
    outcome
}

async fn run(
    store: &IntakeStore,
    config: &WaterlogConfig,
    command: Command,
) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Add { amount, at, id } => {
            let timestamp = at.unwrap_or_else(Utc::now);
            let intake = match id {
                Some(id) => WaterIntake::with_id(id, amount, timestamp),
                None => WaterIntake::new(amount, timestamp),
            };
            let id = store.insert_intake(intake).await?;
            println!("Recorded #{}: {}ml at {}", id, amount, timestamp.to_rfc3339());
        }
        Command::Delete { id } => {
            if store.delete_intake(id).await? {
                println!("Deleted #{}", id);
            } else {
                println!("No intake #{}", id);
            }
        }
        Command::List { json } => {
            let intakes = store.all_intakes().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&intakes)?);
            } else {
                print_intakes(&intakes);
            }
        }
        Command::Today => {
            let total = store.today_total().await?;
            print_today(total, config.tracker.daily_goal_ml);
        }
        Command::History { days } => {
            let (from, to) = history_window(days, Utc::now().date_naive())
                .ok_or("history window starts before the earliest supported date")?;
            for day in store.daily_totals(from, to).await? {
                println!("{}  {:>6}ml  ({} entries)", day.day, day.total, day.entries);
            }
        }
        Command::Monthly { months } => {
            let (from, to) = monthly_window(months, Utc::now().date_naive())
                .ok_or("monthly window starts before the earliest supported date")?;
            for month in store.monthly_totals(from, to).await? {
                println!(
                    "{}  {:>8}ml  ({} entries)",
                    month.month.format("%Y-%m"),
                    month.total,
                    month.entries
                );
            }
        }
        Command::Goal { .. } => {}
        Command::Watch => watch(store, config.tracker.daily_goal_ml).await?,
    }
    Ok(())
}

/// A snapshot from one of the standing queries followed by `watch`.
enum Update {
    Intakes(StoreResult<Vec<WaterIntake>>),
    Today(StoreResult<Option<u64>>),
}

/// Follow both standing queries until Ctrl+C.
async fn watch(store: &IntakeStore, goal_ml: u32) -> Result<(), Box<dyn std::error::Error>> {
    let intakes = store.subscribe_all_intakes()?.map(Update::Intakes);
    let today = store.subscribe_today_total()?.map(Update::Today);
    // Dropping the merged stream cancels both subscriptions.
    let mut updates = intakes.merge(today);
    tracing::info!("Watching for changes, press Ctrl+C to stop");

    loop {
        tokio::select! {
            update = updates.next() => match update {
                Some(Update::Intakes(Ok(list))) => print_intakes(&list),
                Some(Update::Today(Ok(total))) => print_today(total, goal_ml),
                Some(Update::Intakes(Err(e)) | Update::Today(Err(e))) => {
                    if e.is_fatal() {
                        return Err(e.into());
                    }
                    tracing::warn!(error = %e, "Refresh failed");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    Ok(())
}

fn print_intakes(intakes: &[WaterIntake]) {
    if intakes.is_empty() {
        println!("No intakes recorded");
        return;
    }
    for intake in intakes {
        println!(
            "#{:<6} {:>6}ml  {}",
            intake.id,
            intake.amount,
            intake.timestamp.format("%Y-%m-%d %H:%M:%S%.3f UTC")
        );
    }
}

fn print_today(total: Option<u64>, goal_ml: u32) {
    match total {
        Some(total) => {
            let percent = if goal_ml == 0 {
                100
            } else {
                (total * 100 / u64::from(goal_ml)).min(100)
            };
            println!("Today: {}ml / {}ml ({}%)", total, goal_ml, percent);
        }
        None => println!("Today: nothing recorded yet (goal {}ml)", goal_ml),
    }
}
