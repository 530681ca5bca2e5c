//! Snapshot reconciliation against the in-memory store.

mod common;

use chrono::{DateTime, Duration, Utc};
use common::{goal, kickoff, occurrence};
use fixture_sync::adapters::MemoryStore;
use fixture_sync::config::ReconcilerConfig;
use fixture_sync::engine::{RaceGuard, SnapshotReconciler, WriterRole};
use std::sync::Arc;

fn at(mins: i64) -> DateTime<Utc> {
    kickoff() + Duration::minutes(mins)
}

fn live_reconciler(store: &Arc<MemoryStore>) -> SnapshotReconciler<MemoryStore> {
    SnapshotReconciler::new(
        Arc::clone(store),
        RaceGuard::new(WriterRole::Live),
        &ReconcilerConfig::default(),
    )
}

#[tokio::test]
async fn test_same_snapshot_twice_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = live_reconciler(&store);
    let snapshot = vec![
        goal("P1", 4, 10, "A. Scorer", &["B. Helper"]),
        occurrence("penalty", "P1", 9, 20, "C. Sinner", &[]),
        occurrence("shot", "P2", 2, 10, "A. Scorer", &[]),
    ];

    let first = reconciler.reconcile(1, &snapshot, at(10)).await.unwrap();
    assert_eq!(first.inserted, 3);
    let stored = store.records_of(1);

    let second = reconciler.reconcile(1, &snapshot, at(11)).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.deleted, 0);
    assert_eq!(second.unchanged, 3);
    assert!(!second.changed());
    assert_eq!(store.records_of(1), stored);
}

#[tokio::test]
async fn test_late_assists_update_the_same_record() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = live_reconciler(&store);

    reconciler
        .reconcile(1, &[goal("P1", 4, 10, "A. Scorer", &[])], at(5))
        .await
        .unwrap();
    let first_seen = store.records_of(1)[0].first_seen_at;

    let outcome = reconciler
        .reconcile(1, &[goal("P1", 4, 10, "A. Scorer", &["B. Helper", "C. Helper"])], at(6))
        .await
        .unwrap();
    assert_eq!(outcome.updated, 1);
    assert_eq!(outcome.inserted, 0);

    // A later snapshot dropping one assist does not shrink the list
    let outcome = reconciler
        .reconcile(1, &[goal("P1", 4, 10, "A. Scorer", &["B. Helper"])], at(7))
        .await
        .unwrap();
    assert_eq!(outcome.unchanged, 1);

    let records = store.records_of(1);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].assists, vec!["B. Helper", "C. Helper"]);
    assert_eq!(records[0].first_seen_at, first_seen);
}

#[tokio::test]
async fn test_retracted_volatile_record_is_deleted() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = live_reconciler(&store);
    let kept = goal("P1", 4, 10, "A. Scorer", &[]);
    let disallowed = goal("P1", 12, 20, "D. Offside", &[]);
    let shot = occurrence("shot", "P1", 12, 20, "D. Offside", &[]);

    reconciler
        .reconcile(1, &[kept.clone(), disallowed, shot.clone()], at(15))
        .await
        .unwrap();
    assert_eq!(store.records_of(1).len(), 3);

    // The goal at 12' was overturned; the shot is not volatile and stays
    let outcome = reconciler.reconcile(1, &[kept], at(16)).await.unwrap();
    assert_eq!(outcome.deleted, 1);

    let kinds: Vec<(String, Option<i32>)> = store
        .records_of(1)
        .into_iter()
        .map(|r| (r.kind, r.time_offset))
        .collect();
    assert_eq!(kinds.len(), 2);
    assert!(kinds.contains(&("goal".to_string(), Some(4))));
    assert!(kinds.contains(&("shot".to_string(), Some(12))));
}

#[tokio::test]
async fn test_empty_snapshot_keeps_records_by_default() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = live_reconciler(&store);
    reconciler
        .reconcile(1, &[goal("P1", 4, 10, "A. Scorer", &[])], at(5))
        .await
        .unwrap();

    let outcome = reconciler.reconcile(1, &[], at(6)).await.unwrap();
    assert_eq!(outcome.deleted, 0);
    assert_eq!(store.records_of(1).len(), 1);
}

#[tokio::test]
async fn test_empty_snapshot_purges_when_configured() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = SnapshotReconciler::new(
        Arc::clone(&store),
        RaceGuard::new(WriterRole::Live),
        &ReconcilerConfig {
            purge_on_empty_snapshot: true,
            ..ReconcilerConfig::default()
        },
    );
    reconciler
        .reconcile(
            1,
            &[
                goal("P1", 4, 10, "A. Scorer", &[]),
                occurrence("shot", "P1", 5, 10, "A. Scorer", &[]),
            ],
            at(5),
        )
        .await
        .unwrap();

    let outcome = reconciler.reconcile(1, &[], at(6)).await.unwrap();
    assert_eq!(outcome.deleted, 1);
    assert_eq!(store.records_of(1)[0].kind, "shot");
}

#[tokio::test]
async fn test_identical_occurrences_are_kept_apart() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = live_reconciler(&store);
    let twin = occurrence("penalty", "P2", 7, 10, "E. Twin", &[]);

    let outcome = reconciler
        .reconcile(1, &[twin.clone(), twin.clone()], at(30))
        .await
        .unwrap();
    assert_eq!(outcome.inserted, 2);

    // One of the twins is retracted
    let outcome = reconciler.reconcile(1, &[twin], at(31)).await.unwrap();
    assert_eq!(outcome.deleted, 1);
    assert_eq!(store.records_of(1).len(), 1);
}

#[tokio::test]
async fn test_records_are_ordered_by_period_then_minute() {
    let store = Arc::new(MemoryStore::new());
    let reconciler = live_reconciler(&store);
    reconciler
        .reconcile(
            1,
            &[
                goal("OT", 2, 10, "F. Late", &[]),
                goal("P2", 15, 20, "G. Mid", &[]),
                goal("P1", 18, 10, "H. Early", &[]),
                goal("P2", 3, 10, "I. Mid", &[]),
            ],
            at(90),
        )
        .await
        .unwrap();

    let order: Vec<(String, Option<i32>)> = store
        .records_of(1)
        .into_iter()
        .map(|r| (r.period, r.time_offset))
        .collect();
    assert_eq!(
        order,
        vec![
            ("P1".to_string(), Some(18)),
            ("P2".to_string(), Some(3)),
            ("P2".to_string(), Some(15)),
            ("OT".to_string(), Some(2)),
        ]
    );
}
