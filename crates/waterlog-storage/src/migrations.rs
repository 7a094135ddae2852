//! Database schema migrations.
//!
//! Applies the initial schema: the water_intake record-set and the
//! schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use waterlog_core::error::{Result, WaterlogError};

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental changes.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| WaterlogError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version = current_version(conn)?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: water_intake");
    }

    Ok(())
}

/// Highest applied migration version, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| WaterlogError::Storage(format!("Failed to query migration version: {}", e)))
}

/// Version 1: intake table.
///
/// `timestamp` holds epoch milliseconds. It is nullable at rest; the
/// repository never writes NULL and treats one on read as corruption.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS water_intake (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            amount      INTEGER NOT NULL CHECK (amount >= 0),
            timestamp   INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_water_intake_timestamp
            ON water_intake (timestamp DESC);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'water_intake');
        ",
    )
    .map_err(|e| WaterlogError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
