//! End-to-end tests for the intake store: write path, standing queries and
//! subscription lifecycle. Each test uses its own in-memory store.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_stream::StreamExt;

use waterlog_core::config::StorageConfig;
use waterlog_core::error::WaterlogError;
use waterlog_core::types::WaterIntake;
use waterlog_storage::{IntakeStore, LiveQuery};

// =============================================================================
// Helpers
// =============================================================================

fn today_at(hour: u32) -> DateTime<Utc> {
    Utc::now()
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
        .and_utc()
}

fn yesterday_at(hour: u32) -> DateTime<Utc> {
    today_at(hour) - chrono::Duration::days(1)
}

async fn next_item<T>(live: &mut LiveQuery<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), live.next())
        .await
        .expect("timed out waiting for snapshot")
        .expect("stream ended unexpectedly")
        .expect("snapshot was an error")
}

async fn assert_quiet<T>(live: &mut LiveQuery<T>) {
    let pending = tokio::time::timeout(Duration::from_millis(200), live.next()).await;
    assert!(pending.is_err(), "unexpected delivery");
}

fn amounts(intakes: &[WaterIntake]) -> Vec<u32> {
    intakes.iter().map(|i| i.amount).collect()
}

// =============================================================================
// Write path
// =============================================================================

#[tokio::test]
async fn test_auto_ids_are_unique() {
    let store = IntakeStore::in_memory().unwrap();
    let mut ids = Vec::new();
    for _ in 0..20 {
        ids.push(store.record(100, Utc::now()).await.unwrap());
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 20);
    assert!(ids.iter().all(|&id| id != 0));
}

#[tokio::test]
async fn test_colliding_id_leaves_store_unchanged() {
    let store = IntakeStore::in_memory().unwrap();
    let id = store.record(200, today_at(8)).await.unwrap();
    let before = store.all_intakes().await.unwrap();

    let err = store
        .insert_intake(WaterIntake::with_id(id, 999, today_at(10)))
        .await
        .unwrap_err();

    assert!(matches!(err, WaterlogError::Constraint(_)));
    assert_eq!(store.all_intakes().await.unwrap(), before);
}

#[tokio::test]
async fn test_delete_missing_id_is_not_an_error() {
    let store = IntakeStore::in_memory().unwrap();
    store.record(200, today_at(8)).await.unwrap();

    assert!(!store.delete_intake(9_999).await.unwrap());
    assert_eq!(store.repository().count().unwrap(), 1);
}

#[tokio::test]
async fn test_query_all_returns_every_record_newest_first() {
    let store = IntakeStore::in_memory().unwrap();
    let base = Utc::now() - chrono::Duration::days(3);
    for minutes in [30, 5, 120, 45, 0, 90, 15] {
        store
            .record(minutes, base + chrono::Duration::minutes(minutes as i64))
            .await
            .unwrap();
    }

    let all = store.all_intakes().await.unwrap();
    assert_eq!(amounts(&all), vec![120, 90, 45, 30, 15, 5, 0]);
}

#[tokio::test]
async fn test_round_trip_keeps_millisecond_precision() {
    let store = IntakeStore::in_memory().unwrap();
    let ts = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_789).unwrap();
    let id = store.record(321, ts).await.unwrap();

    let all = store.all_intakes().await.unwrap();
    assert_eq!(all, vec![WaterIntake::with_id(id, 321, ts)]);
}

// =============================================================================
// Today's total
// =============================================================================

#[tokio::test]
async fn test_scenario_insert_insert_delete() {
    let store = IntakeStore::in_memory().unwrap();
    store.record(200, today_at(8)).await.unwrap();
    let big = store.record(300, today_at(9)).await.unwrap();

    let all = store.all_intakes().await.unwrap();
    assert_eq!(amounts(&all), vec![300, 200]);
    assert_eq!(all[0].timestamp, today_at(9));
    assert_eq!(all[1].timestamp, today_at(8));
    assert_eq!(store.today_total().await.unwrap(), Some(500));

    store.delete_intake(big).await.unwrap();

    let all = store.all_intakes().await.unwrap();
    assert_eq!(amounts(&all), vec![200]);
    assert_eq!(store.today_total().await.unwrap(), Some(200));
}

#[tokio::test]
async fn test_yesterday_only_gives_absent_total() {
    let store = IntakeStore::in_memory().unwrap();
    store.record(750, yesterday_at(20)).await.unwrap();

    assert_eq!(store.today_total().await.unwrap(), None);
}

#[tokio::test]
async fn test_empty_store_gives_absent_total() {
    let store = IntakeStore::in_memory().unwrap();
    assert_eq!(store.today_total().await.unwrap(), None);
}

// =============================================================================
// Subscriptions
// =============================================================================

#[tokio::test]
async fn test_all_intakes_subscription_follows_writes() {
    let store = IntakeStore::in_memory().unwrap();
    let mut live = store.subscribe_all_intakes().unwrap();
    assert!(next_item(&mut live).await.is_empty());

    store.record(200, today_at(8)).await.unwrap();
    assert_eq!(amounts(&next_item(&mut live).await), vec![200]);

    let id = store.record(300, today_at(9)).await.unwrap();
    assert_eq!(amounts(&next_item(&mut live).await), vec![300, 200]);

    store.delete_intake(id).await.unwrap();
    assert_eq!(amounts(&next_item(&mut live).await), vec![200]);

    live.cancel();
    store.record(400, today_at(10)).await.unwrap();
    assert!(live.next().await.is_none());
}

#[tokio::test]
async fn test_today_total_subscription() {
    let store = IntakeStore::in_memory().unwrap();
    let mut total = store.subscribe_today_total().unwrap();
    assert_eq!(next_item(&mut total).await, None);

    store.record(200, today_at(8)).await.unwrap();
    assert_eq!(next_item(&mut total).await, Some(200));

    // Table-level invalidation: a write that cannot change today's total
    // still produces a fresh snapshot.
    store.record(900, yesterday_at(8)).await.unwrap();
    assert_eq!(next_item(&mut total).await, Some(200));

    let id = store.record(300, today_at(9)).await.unwrap();
    assert_eq!(next_item(&mut total).await, Some(500));

    store.delete_intake(id).await.unwrap();
    assert_eq!(next_item(&mut total).await, Some(200));
}

#[tokio::test]
async fn test_missing_delete_does_not_wake_subscribers() {
    let store = IntakeStore::in_memory().unwrap();
    let mut live = store.subscribe_all_intakes().unwrap();
    next_item(&mut live).await;

    store.delete_intake(12_345).await.unwrap();

    assert_quiet(&mut live).await;
}

#[tokio::test]
async fn test_failed_insert_does_not_wake_subscribers() {
    let store = IntakeStore::in_memory().unwrap();
    let id = store.record(100, today_at(7)).await.unwrap();
    let mut live = store.subscribe_all_intakes().unwrap();
    next_item(&mut live).await;

    assert!(store
        .insert_intake(WaterIntake::with_id(id, 5, today_at(7)))
        .await
        .is_err());

    assert_quiet(&mut live).await;
}

#[tokio::test]
async fn test_independent_subscriptions() {
    let store = IntakeStore::in_memory().unwrap();
    let mut first = store.subscribe_all_intakes().unwrap();
    let mut second = store.subscribe_all_intakes().unwrap();
    next_item(&mut first).await;
    next_item(&mut second).await;

    store.record(250, today_at(8)).await.unwrap();
    first.cancel();

    assert_eq!(amounts(&next_item(&mut second).await), vec![250]);
    assert!(first.next().await.is_none());
}

#[tokio::test]
async fn test_snapshots_arrive_in_commit_order() {
    let store = IntakeStore::in_memory().unwrap();
    let mut live = store.subscribe_all_intakes().unwrap();
    next_item(&mut live).await;

    for n in 1..=5u32 {
        store.record(n, today_at(6)).await.unwrap();
    }

    // Commits may be conflated, but each snapshot reflects at least as many
    // rows as the one before it and the last one reflects all of them.
    let mut last_len = 0;
    while last_len < 5 {
        let len = next_item(&mut live).await.len();
        assert!(len >= last_len);
        last_len = len;
    }
    assert_quiet(&mut live).await;
}

#[tokio::test]
async fn test_slow_consumer_backlog_is_bounded() {
    let store = IntakeStore::in_memory().unwrap();
    let mut live = store.subscribe_all_intakes().unwrap();

    for n in 0..300u32 {
        store.record(n, today_at(7)).await.unwrap();
    }

    let mut snapshots = Vec::new();
    while let Ok(Some(item)) =
        tokio::time::timeout(Duration::from_millis(300), live.next()).await
    {
        snapshots.push(item.unwrap());
    }

    let rows: usize = snapshots.iter().map(Vec::len).sum();
    assert!(snapshots.len() <= 3, "{} snapshots queued", snapshots.len());
    assert!(rows <= 3 * 300, "{} rows materialized", rows);
    assert_eq!(snapshots.last().map(Vec::len), Some(300));
}

#[tokio::test]
async fn test_subscription_is_a_stream() {
    let store = IntakeStore::in_memory().unwrap();
    let live = store.subscribe_today_total().unwrap();

    let writer = store.clone();
    tokio::spawn(async move {
        writer.record(100, today_at(8)).await.unwrap();
        writer.record(150, today_at(9)).await.unwrap();
    });

    let mut totals = live.map(|item| item.unwrap());
    let mut seen = Vec::new();
    while let Some(total) = tokio::time::timeout(Duration::from_secs(5), totals.next())
        .await
        .unwrap()
    {
        seen.push(total);
        if total == Some(250) {
            break;
        }
    }

    // The writer may race the initial evaluation and commits may be
    // conflated, so only monotonic progress and the final value are fixed.
    assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(seen.last(), Some(&Some(250)));
}

#[tokio::test]
async fn test_read_fault_is_delivered_as_error_item() {
    let store = IntakeStore::in_memory().unwrap();
    let mut live = store.subscribe_all_intakes().unwrap();
    next_item(&mut live).await;

    // A row with a NULL timestamp can only come from outside the write path.
    store
        .repository()
        .database()
        .write(|tx| {
            tx.execute(
                "INSERT INTO water_intake (amount, timestamp) VALUES (100, NULL)",
                [],
            )
            .map_err(waterlog_storage::db::sqlite_error)?;
            Ok(())
        })
        .unwrap();

    let item = tokio::time::timeout(Duration::from_secs(5), live.next())
        .await
        .unwrap()
        .unwrap();
    let err = item.unwrap_err();
    assert!(err.is_fatal());
}

#[tokio::test]
async fn test_close_after_watching_releases_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("w.db");
    let store = IntakeStore::open(&path, &StorageConfig::default()).unwrap();
    store.record(200, today_at(8)).await.unwrap();

    let mut intakes = store.subscribe_all_intakes().unwrap();
    let mut total = store.subscribe_today_total().unwrap();
    next_item(&mut intakes).await;
    next_item(&mut total).await;
    intakes.cancel();

    store.close().unwrap();

    assert!(!dir.path().join("w.db-wal").exists());
    assert!(total.next().await.is_none());

    let reopened = IntakeStore::open(&path, &StorageConfig::default()).unwrap();
    assert_eq!(reopened.today_total().await.unwrap(), Some(200));
    reopened.close().unwrap();
}

#[tokio::test]
async fn test_subscribe_after_close_fails() {
    let store = IntakeStore::in_memory().unwrap();
    let other = store.clone();
    store.close().unwrap();

    assert!(matches!(
        other.subscribe_all_intakes(),
        Err(WaterlogError::Closed)
    ));
}
