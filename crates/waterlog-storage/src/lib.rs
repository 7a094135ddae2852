//! Waterlog storage crate - SQLite persistence and live queries.
//!
//! Provides a WAL-mode SQLite database with migrations, the intake
//! repository, table-level change notification, live queries that re-run on
//! every committed change, and the async `IntakeStore` facade tying them
//! together.

pub mod db;
pub mod invalidation;
pub mod live;
pub mod migrations;
pub mod repository;
pub mod store;

pub use db::Database;
pub use invalidation::{InvalidationTracker, ObserverId};
pub use live::LiveQuery;
pub use repository::IntakeRepository;
pub use store::IntakeStore;
