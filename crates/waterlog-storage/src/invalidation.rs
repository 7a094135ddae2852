//! Table-level change notification.
//!
//! The tracker maps record-set names to the observers interested in them.
//! `Database::write` reports the tables a committed transaction touched and
//! every observer registered on any of those tables is woken. Observers are
//! not told what changed, only that they should re-evaluate, so wake-ups that
//! arrive before the observer has caught up collapse into one.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use waterlog_core::error::{Result, WaterlogError};

/// Identifier handed out to each registered observer.
pub type ObserverId = u64;

/// Receiving side of an observer's wake channel.
pub type WakeReceiver = mpsc::Receiver<()>;

/// At most one wake-up is ever pending per observer.
const WAKE_CAPACITY: usize = 1;

struct Observer {
    tables: BTreeSet<String>,
    wake: mpsc::Sender<()>,
}

/// Change notification bus shared by the database and its live queries.
pub struct InvalidationTracker {
    observers: Mutex<HashMap<ObserverId, Observer>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl Default for InvalidationTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidationTracker {
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Register interest in the given tables.
    ///
    /// Returns the observer id (for `remove_observer`) and the channel that
    /// receives a `()` after a committed transaction touches any of the
    /// tables. Commits made while a wake-up is still pending share it.
    pub fn add_observer(&self, tables: &[&str]) -> Result<(ObserverId, WakeReceiver)> {
        let mut observers = self.lock()?;
        // Checked under the lock so that `close` cannot race a registration.
        if self.closed.load(Ordering::Acquire) {
            return Err(WaterlogError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (wake, rx) = mpsc::channel(WAKE_CAPACITY);
        observers.insert(
            id,
            Observer {
                tables: tables.iter().map(|t| t.to_string()).collect(),
                wake,
            },
        );
        debug!(observer = id, ?tables, "Observer registered");
        Ok((id, rx))
    }

    /// Unregister an observer. Returns false if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        match self.observers.lock() {
            Ok(mut observers) => observers.remove(&id).is_some(),
            Err(_) => false,
        }
    }

    /// Wake every observer registered on at least one of `tables`.
    ///
    /// An observer that already has a wake-up pending counts as woken.
    /// Observers whose receiving side has gone away are dropped. Returns the
    /// number of observers woken.
    pub fn notify<I, S>(&self, tables: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tables: Vec<S> = tables.into_iter().collect();
        let Ok(mut observers) = self.observers.lock() else {
            return 0;
        };

        let mut woken = 0;
        observers.retain(|id, observer| {
            let interested = tables
                .iter()
                .any(|t| observer.tables.contains(t.as_ref()));
            if !interested {
                return true;
            }
            match observer.wake.try_send(()) {
                Ok(()) | Err(TrySendError::Full(())) => {
                    woken += 1;
                    true
                }
                Err(TrySendError::Closed(())) => {
                    debug!(observer = id, "Dropping observer with closed channel");
                    false
                }
            }
        });

        debug!(
            tables = ?tables.iter().map(|t| t.as_ref()).collect::<Vec<_>>(),
            woken,
            "Invalidation dispatched"
        );
        woken
    }

    /// Number of live observers registered on `table`.
    pub fn observer_count(&self, table: &str) -> usize {
        match self.observers.lock() {
            Ok(observers) => observers
                .values()
                .filter(|o| o.tables.contains(table) && !o.wake.is_closed())
                .count(),
            Err(_) => 0,
        }
    }

    /// Drop every observer and refuse new registrations.
    ///
    /// Dropping the senders ends all wake channels, which in turn ends the
    /// live queries waiting on them.
    pub fn close(&self) {
        if let Ok(mut observers) = self.observers.lock() {
            self.closed.store(true, Ordering::Release);
            let dropped = observers.len();
            observers.clear();
            debug!(dropped, "Invalidation tracker closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<ObserverId, Observer>>> {
        self.observers
            .lock()
            .map_err(|e| WaterlogError::Storage(format!("Observer registry lock poisoned: {}", e)))
    }
}

impl std::fmt::Debug for InvalidationTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvalidationTracker")
            .field("closed", &self.is_closed())
            .finish()
    }
}
