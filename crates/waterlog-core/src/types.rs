use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WaterlogError};

/// Name of the record-set holding intake entries. Live queries register
/// against this name and writes to the table invalidate them.
pub const WATER_INTAKE_TABLE: &str = "water_intake";

/// Id value that asks the store to assign a fresh id on insert.
pub const UNSAVED_ID: i64 = 0;

// =============================================================================
// Entities
// =============================================================================

/// One recorded drinking event.
///
/// Entries are never updated in place; the only mutation after insert is
/// deletion by id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaterIntake {
    /// Primary key. `0` means "not yet stored".
    pub id: i64,
    /// Amount drunk in milliliters.
    pub amount: u32,
    /// When the intake happened.
    pub timestamp: DateTime<Utc>,
}

impl WaterIntake {
    /// A new, unsaved entry. The store assigns its id on insert.
    pub fn new(amount: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: UNSAVED_ID,
            amount,
            timestamp,
        }
    }

    /// An entry with a caller-chosen id.
    pub fn with_id(id: i64, amount: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            amount,
            timestamp,
        }
    }

    pub fn is_unsaved(&self) -> bool {
        self.id == UNSAVED_ID
    }

    /// Timestamp in the storage representation.
    pub fn epoch_millis(&self) -> i64 {
        to_epoch_millis(self.timestamp)
    }
}

/// Sum of intake amounts for one UTC calendar day.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTotal {
    pub day: NaiveDate,
    pub total: u64,
    pub entries: u64,
}

/// Sum of intake amounts for one UTC calendar month.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyTotal {
    /// First day of the month.
    pub month: NaiveDate,
    pub total: u64,
    pub entries: u64,
}

// =============================================================================
// Time conversion
// =============================================================================

/// Convert a domain timestamp into epoch milliseconds.
pub fn to_epoch_millis(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

/// Convert a stored epoch-millisecond value back into a domain timestamp.
///
/// The column is nullable at rest but the write path never stores NULL, so an
/// absent value is reported as a data-integrity fault.
pub fn from_epoch_millis(value: Option<i64>) -> Result<DateTime<Utc>> {
    let millis = value.ok_or_else(|| {
        WaterlogError::DataIntegrity("expected non-null timestamp, found NULL".to_string())
    })?;
    DateTime::<Utc>::from_timestamp_millis(millis).ok_or_else(|| {
        WaterlogError::DataIntegrity(format!("timestamp {} is out of range", millis))
    })
}

/// Milliseconds in one UTC day.
pub const MILLIS_PER_DAY: i64 = 86_400_000;

/// First day of the month containing `day`.
pub fn month_start(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

/// Half-open epoch-millisecond range `[start, end)` covering a UTC day.
pub fn utc_day_bounds(day: NaiveDate) -> (i64, i64) {
    let start = day.and_time(NaiveTime::default()).and_utc();
    let end = start + chrono::Duration::days(1);
    (to_epoch_millis(start), to_epoch_millis(end))
}
