//! Repository for the water_intake record-set.
//!
//! All statements are raw SQL against the shared `Database`. Writes go
//! through `Database::write` so they are transactional and notify live
//! queries on commit; reads go through `Database::with_conn`.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rusqlite::OptionalExtension;

use waterlog_core::error::{Result, WaterlogError};
use waterlog_core::types::{
    from_epoch_millis, month_start, utc_day_bounds, DailyTotal, MonthlyTotal, WaterIntake,
    MILLIS_PER_DAY,
};

use crate::db::{sqlite_error, Database};

/// Repository for intake entries.
#[derive(Clone, Debug)]
pub struct IntakeRepository {
    db: Arc<Database>,
}

impl IntakeRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Store a new entry and return its id.
    ///
    /// An id of 0 lets SQLite assign the next rowid. An explicit id that is
    /// already taken fails with `Constraint` and nothing is written.
    pub fn insert(&self, intake: &WaterIntake) -> Result<i64> {
        self.db.write(|tx| {
            tx.execute(
                "INSERT OR ABORT INTO water_intake (id, amount, timestamp)
                 VALUES (nullif(?1, 0), ?2, ?3)",
                rusqlite::params![intake.id, intake.amount, intake.epoch_millis()],
            )
            .map_err(sqlite_error)?;
            Ok(tx.last_insert_rowid())
        })
    }

    /// Delete the entry with the given id.
    ///
    /// Returns whether a row was removed; a missing id is not an error.
    pub fn delete(&self, id: i64) -> Result<bool> {
        self.db.write(|tx| {
            let removed = tx
                .execute(
                    "DELETE FROM water_intake WHERE id = ?1",
                    rusqlite::params![id],
                )
                .map_err(sqlite_error)?;
            Ok(removed > 0)
        })
    }

    /// All entries, most recent first. Entries sharing a timestamp are listed
    /// newest-inserted first.
    pub fn query_all(&self) -> Result<Vec<WaterIntake>> {
        read_all(&self.db)
    }

    /// Total amount recorded on the current UTC day, `None` if nothing was.
    pub fn query_today_total(&self) -> Result<Option<u64>> {
        self.total_for_day(Utc::now().date_naive())
    }

    /// Total amount recorded on `day` (UTC), `None` if nothing was.
    pub fn total_for_day(&self, day: NaiveDate) -> Result<Option<u64>> {
        read_total_for_day(&self.db, day)
    }

    /// Per-day totals for every UTC day in `[from, to]` that has entries,
    /// in ascending day order.
    pub fn daily_totals(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<DailyTotal>> {
        let (start, _) = utc_day_bounds(from);
        let (_, end) = utc_day_bounds(to);
        self.db.with_conn(|conn| {
            // Floor to the start of the UTC day; `/` truncates toward zero and
            // would misplace pre-1970 timestamps.
            let mut stmt = conn
                .prepare(
                    "SELECT timestamp - ((timestamp % ?3) + ?3) % ?3 AS day_start,
                            SUM(amount), COUNT(*)
                     FROM water_intake
                     WHERE timestamp >= ?1 AND timestamp < ?2
                     GROUP BY day_start
                     ORDER BY day_start ASC",
                )
                .map_err(sqlite_error)?;

            let rows = stmt
                .query_map(rusqlite::params![start, end, MILLIS_PER_DAY], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                })
                .map_err(sqlite_error)?;

            let mut totals = Vec::new();
            for row in rows {
                let (day_start, total, entries) = row.map_err(sqlite_error)?;
                totals.push(DailyTotal {
                    day: from_epoch_millis(Some(day_start))?.date_naive(),
                    total: non_negative(total)?,
                    entries: non_negative(entries)?,
                });
            }
            Ok(totals)
        })
    }

    /// Per-month totals for every UTC month overlapping `[from, to]` that has
    /// entries in that range, in ascending order.
    pub fn monthly_totals(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<MonthlyTotal>> {
        let mut months: Vec<MonthlyTotal> = Vec::new();
        for day in self.daily_totals(from, to)? {
            let month = month_start(day.day);
            match months.last_mut() {
                Some(last) if last.month == month => {
                    last.total += day.total;
                    last.entries += day.entries;
                }
                _ => months.push(MonthlyTotal {
                    month,
                    total: day.total,
                    entries: day.entries,
                }),
            }
        }
        Ok(months)
    }

    /// Find an entry by id.
    pub fn find_by_id(&self, id: i64) -> Result<Option<WaterIntake>> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT id, amount, timestamp FROM water_intake WHERE id = ?1",
                    rusqlite::params![id],
                    row_to_intake,
                )
                .optional()
                .map_err(sqlite_error)?;
            result.transpose()
        })
    }

    /// Count stored entries.
    pub fn count(&self) -> Result<u64> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM water_intake", [], |row| row.get(0))
                .map_err(sqlite_error)?;
            non_negative(count)
        })
    }
}

// ============================================================================
// Standing-query reads
// ============================================================================

/// All entries, most recent first. Shared by `query_all` and the live
/// history subscription.
pub(crate) fn read_all(db: &Database) -> Result<Vec<WaterIntake>> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare(
                "SELECT id, amount, timestamp FROM water_intake
                 ORDER BY timestamp DESC, id DESC",
            )
            .map_err(sqlite_error)?;

        let rows = stmt.query_map([], row_to_intake).map_err(sqlite_error)?;

        let mut intakes = Vec::new();
        for row in rows {
            intakes.push(row.map_err(sqlite_error)??);
        }
        Ok(intakes)
    })
}

/// Sum of amounts on one UTC day, `None` if the day has no entries.
pub(crate) fn read_total_for_day(db: &Database, day: NaiveDate) -> Result<Option<u64>> {
    let (start, end) = utc_day_bounds(day);
    db.with_conn(|conn| {
        let total: Option<i64> = conn
            .query_row(
                "SELECT SUM(amount) FROM water_intake
                 WHERE timestamp >= ?1 AND timestamp < ?2",
                rusqlite::params![start, end],
                |row| row.get(0),
            )
            .map_err(sqlite_error)?;
        total.map(non_negative).transpose()
    })
}

// ============================================================================
// Row conversion
// ============================================================================

/// Column access errors surface through the outer rusqlite result; domain
/// conversion errors (NULL timestamp, bad amount) through the inner one.
fn row_to_intake(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<WaterIntake>> {
    let id: i64 = row.get(0)?;
    let amount: i64 = row.get(1)?;
    let timestamp: Option<i64> = row.get(2)?;

    Ok(build_intake(id, amount, timestamp))
}

fn build_intake(id: i64, amount: i64, timestamp: Option<i64>) -> Result<WaterIntake> {
    let amount = u32::try_from(amount).map_err(|_| {
        WaterlogError::DataIntegrity(format!("row {} has invalid amount {}", id, amount))
    })?;
    let timestamp = from_epoch_millis(timestamp).map_err(|e| match e {
        WaterlogError::DataIntegrity(msg) => {
            WaterlogError::DataIntegrity(format!("row {}: {}", id, msg))
        }
        other => other,
    })?;
    Ok(WaterIntake::with_id(id, amount, timestamp))
}

fn non_negative(value: i64) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| WaterlogError::DataIntegrity(format!("unexpected negative aggregate {}", value)))
}
