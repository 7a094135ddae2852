//! Live queries: standing queries that re-run whenever their tables change.
//!
//! Each live query registers an observer with the database's invalidation
//! tracker and owns one background task. The task evaluates the query once
//! up front and then once per wake-up, in order, pushing every result to the
//! handle's channel. Evaluation runs on the blocking pool because it takes the
//! connection lock and performs SQLite I/O.
//!
//! Delivery is bounded. The result channel holds one snapshot; while it is
//! full the task waits, and commits made in the meantime collapse into a
//! single pending wake-up. A consumer that stops reading therefore holds at
//! most one queued snapshot, one finished snapshot and one pending
//! re-evaluation, and the next snapshot it reads after catching up reflects
//! every commit so far.
//!
//! The task only holds a weak reference to the database, so a live query
//! never keeps the store alive on its own.

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tracing::{debug, warn};

use waterlog_core::error::{Result, WaterlogError};

use crate::db::Database;
use crate::invalidation::{InvalidationTracker, ObserverId};

/// Snapshots buffered per live query before the task waits for the consumer.
const RESULT_CAPACITY: usize = 1;

/// A standing query result stream.
///
/// Yields `Ok(snapshot)` for every successful evaluation and `Err(error)` when
/// an evaluation fails; a failed evaluation does not end the stream. After
/// `cancel` (or drop) the handle yields nothing further.
pub struct LiveQuery<T> {
    observer: ObserverId,
    tracker: Arc<InvalidationTracker>,
    results: mpsc::Receiver<Result<T>>,
    worker: JoinHandle<()>,
    cancelled: bool,
}

impl<T> LiveQuery<T>
where
    T: Send + 'static,
{
    /// Start a live query over `tables`.
    ///
    /// Must be called from within a tokio runtime. The observer is registered
    /// before the first evaluation, so no commit between subscribing and the
    /// initial snapshot is missed. The query receives the database it was
    /// registered on and should read through that reference rather than
    /// capturing its own handle.
    pub fn spawn<F>(db: Arc<Database>, tables: &[&str], query: F) -> Result<Self>
    where
        F: Fn(&Database) -> Result<T> + Send + Sync + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| WaterlogError::Storage(format!("Live query needs a tokio runtime: {}", e)))?;

        let tracker = Arc::clone(db.tracker());
        let (observer, mut wake) = tracker.add_observer(tables)?;
        let (results_tx, results) = mpsc::channel(RESULT_CAPACITY);
        let query = Arc::new(query);
        let db: Weak<Database> = Arc::downgrade(&db);

        let worker = runtime.spawn(async move {
            let mut generation: u64 = 0;
            loop {
                let db = Weak::clone(&db);
                let query = Arc::clone(&query);
                let evaluation = tokio::task::spawn_blocking(move || {
                    db.upgrade().map(|db| (*query)(&*db))
                });
                let result = match evaluation.await {
                    Ok(Some(result)) => result,
                    Ok(None) => {
                        debug!(observer, "Live query database released");
                        break;
                    }
                    Err(e) => Err(WaterlogError::Storage(format!(
                        "Live query evaluation panicked or was cancelled: {}",
                        e
                    ))),
                };

                match &result {
                    Ok(_) => debug!(observer, generation, "Live query evaluated"),
                    Err(e) => warn!(observer, generation, error = %e, "Live query evaluation failed"),
                }

                if results_tx.send(result).await.is_err() {
                    break;
                }
                generation += 1;

                if wake.recv().await.is_none() {
                    debug!(observer, "Live query wake channel closed");
                    break;
                }
            }
        });

        Ok(Self {
            observer,
            tracker,
            results,
            worker,
            cancelled: false,
        })
    }
}

impl<T> LiveQuery<T> {
    /// Wait for the next result. Returns `None` once the query is cancelled
    /// or its store has been closed.
    pub async fn next(&mut self) -> Option<Result<T>> {
        if self.cancelled {
            return None;
        }
        self.results.recv().await
    }

    /// Stop the query.
    ///
    /// Unregisters from the tracker, aborts any in-flight evaluation and
    /// discards results that were produced but not yet consumed. Once this
    /// returns, `next` yields `None`.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.tracker.remove_observer(self.observer);
        self.worker.abort();
        self.results.close();
        while self.results.try_recv().is_ok() {}
        debug!(observer = self.observer, "Live query cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

// No field is structurally pinned.
impl<T> Unpin for LiveQuery<T> {}

impl<T> Stream for LiveQuery<T> {
    type Item = Result<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.cancelled {
            return Poll::Ready(None);
        }
        this.results.poll_recv(cx)
    }
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<T> std::fmt::Debug for LiveQuery<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveQuery")
            .field("observer", &self.observer)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}
