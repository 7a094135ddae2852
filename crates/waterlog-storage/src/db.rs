//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex. Reads and writes both go
//! through the lock, so a reader never observes a transaction that has not
//! committed. Writes run inside an explicit transaction and, once committed,
//! report the tables they touched to the invalidation tracker.
//!
//! `close` releases the connection even while other `Arc<Database>` handles
//! are alive; those handles then fail with `WaterlogError::Closed`.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::hooks::Action;
use rusqlite::{Connection, ErrorCode, Transaction};
use tracing::{debug, info};

use waterlog_core::error::{Result, WaterlogError};

use crate::invalidation::InvalidationTracker;
use crate::migrations;

/// Default time a statement waits on a locked database file.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database handle shared by the repository and live queries.
pub struct Database {
    /// `None` once the database has been closed.
    conn: Mutex<Option<Connection>>,
    /// Tables written by the transaction currently in progress, filled by the
    /// connection's update hook.
    touched: Arc<Mutex<BTreeSet<String>>>,
    tracker: Arc<InvalidationTracker>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL and the busy timeout, then runs
    /// all pending migrations.
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| WaterlogError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(|e| WaterlogError::Storage(format!("Failed to set pragmas: {}", e)))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| WaterlogError::Storage(format!("Failed to set busy timeout: {}", e)))?;

        let db = Self::from_connection(conn)?;
        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| WaterlogError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;

        // Installed after migrations so schema bookkeeping is not reported.
        let touched = Arc::new(Mutex::new(BTreeSet::new()));
        let sink = Arc::clone(&touched);
        conn.update_hook(Some(
            move |_action: Action, _db: &str, table: &str, _rowid: i64| {
                if let Ok(mut tables) = sink.lock() {
                    tables.insert(table.to_string());
                }
            },
        ));

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            touched,
            tracker: Arc::new(InvalidationTracker::new()),
        })
    }

    /// The change notification bus fed by this database's commits.
    pub fn tracker(&self) -> &Arc<InvalidationTracker> {
        &self.tracker
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// Intended for reads. The mutex is held for the duration of the closure,
    /// so the closure sees only committed state.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(WaterlogError::Closed)?;
        f(conn)
    }

    /// Run a closure inside a write transaction.
    ///
    /// The transaction commits only if the closure succeeds; any error rolls
    /// it back and leaves the database unchanged. After a successful commit
    /// the tables the transaction wrote are reported to the tracker while the
    /// connection lock is still held, so notifications follow commit order.
    pub fn write<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(WaterlogError::Closed)?;
        self.take_touched();

        let tx = conn.transaction().map_err(sqlite_error)?;
        let result = match f(&tx) {
            Ok(value) => tx.commit().map(|()| value).map_err(sqlite_error),
            Err(e) => Err(e),
        };

        let tables = self.take_touched();
        match result {
            Ok(value) => {
                if !tables.is_empty() {
                    self.tracker.notify(&tables);
                }
                Ok(value)
            }
            Err(e) => {
                debug!(error = %e, "Write transaction rolled back");
                Err(e)
            }
        }
    }

    /// Close the connection, ending every live query on this database.
    ///
    /// Waits for an in-flight statement to finish, then releases the
    /// connection. Later calls through any handle fail with `Closed`; closing
    /// twice is a no-op.
    pub fn close(&self) -> Result<()> {
        self.tracker.close();
        let Some(conn) = self.lock()?.take() else {
            return Ok(());
        };
        conn.close().map_err(|(_, e)| sqlite_error(e))?;
        info!("Database closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|e| WaterlogError::Storage(format!("Database lock poisoned: {}", e)))
    }

    fn take_touched(&self) -> BTreeSet<String> {
        match self.touched.lock() {
            Ok(mut tables) => std::mem::take(&mut *tables),
            Err(_) => BTreeSet::new(),
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// Classify a driver error: constraint failures are reported separately from
/// other storage faults.
pub fn sqlite_error(err: rusqlite::Error) -> WaterlogError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            WaterlogError::Constraint(err.to_string())
        }
        _ => WaterlogError::Storage(err.to_string()),
    }
}
