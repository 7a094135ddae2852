//! Async entry point for intake storage.
//!
//! `IntakeStore` owns the database handle for the lifetime of the
//! application. Writes and one-shot reads are dispatched to the blocking pool
//! so callers on an event-driven task are never stalled by SQLite I/O; the two
//! standing queries are exposed as `LiveQuery` streams.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info};

use waterlog_core::config::StorageConfig;
use waterlog_core::error::{Result, WaterlogError};
use waterlog_core::types::{DailyTotal, MonthlyTotal, WaterIntake, WATER_INTAKE_TABLE};

use crate::db::Database;
use crate::live::LiveQuery;
use crate::repository::{read_all, read_total_for_day, IntakeRepository};

/// Process-wide intake store. Clones share the same database.
#[derive(Clone, Debug)]
pub struct IntakeStore {
    repo: IntakeRepository,
}

impl IntakeStore {
    /// Open the store backed by the database file at `path`.
    pub fn open(path: &Path, config: &StorageConfig) -> Result<Self> {
        let db = Database::open(path, Duration::from_millis(config.busy_timeout_ms))?;
        Ok(Self::from_database(Arc::new(db)))
    }

    /// Open a store backed by an in-memory database.
    pub fn in_memory() -> Result<Self> {
        Ok(Self::from_database(Arc::new(Database::in_memory()?)))
    }

    pub fn from_database(db: Arc<Database>) -> Self {
        Self {
            repo: IntakeRepository::new(db),
        }
    }

    /// Synchronous repository over the same database.
    pub fn repository(&self) -> &IntakeRepository {
        &self.repo
    }

    /// Record an entry. Returns the stored id (assigned when `intake.id` is 0).
    pub async fn insert_intake(&self, intake: WaterIntake) -> Result<i64> {
        let amount = intake.amount;
        let assigned = intake.is_unsaved();
        let id = self.blocking(move |repo| repo.insert(&intake)).await?;
        debug!(id, amount, assigned, "Intake recorded");
        Ok(id)
    }

    /// Record `amount` at `timestamp` with a store-assigned id.
    pub async fn record(&self, amount: u32, timestamp: DateTime<Utc>) -> Result<i64> {
        self.insert_intake(WaterIntake::new(amount, timestamp)).await
    }

    /// Delete an entry by id. Returns false when no such entry existed.
    pub async fn delete_intake(&self, id: i64) -> Result<bool> {
        let removed = self.blocking(move |repo| repo.delete(id)).await?;
        debug!(id, removed, "Intake delete processed");
        Ok(removed)
    }

    /// All entries, most recent first.
    pub async fn all_intakes(&self) -> Result<Vec<WaterIntake>> {
        self.blocking(|repo| repo.query_all()).await
    }

    /// Today's (UTC) total, `None` when nothing was recorded today.
    pub async fn today_total(&self) -> Result<Option<u64>> {
        self.blocking(|repo| repo.query_today_total()).await
    }

    /// Per-day totals for `[from, to]`.
    pub async fn daily_totals(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyTotal>> {
        self.blocking(move |repo| repo.daily_totals(from, to)).await
    }

    /// Per-month totals for months overlapping `[from, to]`.
    pub async fn monthly_totals(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<MonthlyTotal>> {
        self.blocking(move |repo| repo.monthly_totals(from, to)).await
    }

    /// Live view of all entries, most recent first.
    pub fn subscribe_all_intakes(&self) -> Result<LiveQuery<Vec<WaterIntake>>> {
        LiveQuery::spawn(
            Arc::clone(self.repo.database()),
            &[WATER_INTAKE_TABLE],
            read_all,
        )
    }

    /// Live view of today's total.
    pub fn subscribe_today_total(&self) -> Result<LiveQuery<Option<u64>>> {
        LiveQuery::spawn(
            Arc::clone(self.repo.database()),
            &[WATER_INTAKE_TABLE],
            |db: &Database| read_total_for_day(db, Utc::now().date_naive()),
        )
    }

    /// Close the store.
    ///
    /// Ends every live query and releases the connection, even if clones of
    /// this store are still alive; their later calls fail with
    /// `WaterlogError::Closed`.
    pub fn close(self) -> Result<()> {
        self.repo.database().close()?;
        info!("Intake store closed");
        Ok(())
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&IntakeRepository) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let repo = self.repo.clone();
        tokio::task::spawn_blocking(move || f(&repo))
            .await
            .map_err(|e| WaterlogError::Storage(format!("Storage task failed: {}", e)))?
    }
}
