//! Live poller and secondary writers sharing one store.

mod common;

use chrono::Duration;
use common::{config, goal, kickoff, ScriptedProvider, PARTITION};
use fixture_sync::adapters::MemoryStore;
use fixture_sync::config::ReconcilerConfig;
use fixture_sync::domain::{CanonicalPhase, Entity};
use fixture_sync::engine::{PollScheduler, RaceGuard, SnapshotReconciler, WriterRole};
use fixture_sync::services::{ReconcileSweep, RefreshOutcome};
use fixture_sync::store::EntityStore;
use std::sync::Arc;

fn entity(id: i64, phase: CanonicalPhase) -> Entity {
    let mut e = Entity::scheduled(id, PARTITION, kickoff(), kickoff());
    e.phase = phase;
    e
}

#[tokio::test]
async fn test_secondary_reconcile_leaves_live_entity_alone() {
    let store = Arc::new(MemoryStore::new());
    store.insert_entity(entity(1, CanonicalPhase::Live));
    let live = SnapshotReconciler::new(
        Arc::clone(&store),
        RaceGuard::new(WriterRole::Live),
        &ReconcilerConfig::default(),
    );
    live.reconcile(1, &[goal("P1", 4, 10, "A. Scorer", &[])], kickoff())
        .await
        .unwrap();

    for role in [WriterRole::Sweep, WriterRole::Backfill] {
        let secondary = SnapshotReconciler::new(
            Arc::clone(&store),
            RaceGuard::new(role),
            &ReconcilerConfig::default(),
        );
        let outcome = secondary.reconcile(1, &[], kickoff()).await.unwrap();
        assert!(outcome.skipped);
        let outcome = secondary
            .reconcile(1, &[goal("P1", 9, 20, "B. Other", &[])], kickoff())
            .await
            .unwrap();
        assert!(outcome.skipped);
    }
    assert_eq!(store.records_of(1).len(), 1);
}

#[tokio::test]
async fn test_sweep_refreshes_finished_and_skips_live() {
    let store = Arc::new(MemoryStore::new());
    store.insert_entity(entity(1, CanonicalPhase::Live));
    store.insert_entity(entity(2, CanonicalPhase::Finished));
    let provider = Arc::new(ScriptedProvider::new());
    provider.set_phase(1, "P3");
    provider.set_phase(2, "FT");
    provider.set_occurrences(2, vec![goal("P1", 4, 10, "A. Scorer", &["B. Helper"])]);

    let sweep = ReconcileSweep::new(
        Arc::clone(&store),
        provider.clone(),
        &config(),
        WriterRole::Sweep,
    )
    .unwrap();
    let report = sweep.run_once(kickoff() + Duration::hours(3)).await.unwrap();

    assert_eq!(report.scanned, 2);
    assert_eq!(report.skipped_live, 1);
    assert_eq!(report.refreshed, 1);
    assert_eq!(report.records.inserted, 1);
    assert_eq!(provider.calls(1), 0);
    assert_eq!(store.records_of(2).len(), 1);
}

#[tokio::test]
async fn test_sweep_backs_off_when_refresh_reveals_live() {
    let store = Arc::new(MemoryStore::new());
    store.insert_entity(entity(1, CanonicalPhase::NotStarted));
    let provider = Arc::new(ScriptedProvider::new());
    provider.set_phase(1, "P2");
    provider.set_occurrences(1, vec![goal("P1", 4, 10, "A. Scorer", &[])]);

    let sweep = ReconcileSweep::new(
        Arc::clone(&store),
        provider.clone(),
        &config(),
        WriterRole::Sweep,
    )
    .unwrap();
    let outcome = sweep
        .refresh_entity(1, kickoff() + Duration::minutes(30))
        .await
        .unwrap();

    assert_eq!(outcome, RefreshOutcome::SkippedLive);
    assert_eq!(provider.occurrence_calls(1), 0);
    assert!(store.records_of(1).is_empty());
    let stored = store.get_entity(1).await.unwrap().unwrap();
    assert_eq!(stored.phase, CanonicalPhase::Live);
}

#[tokio::test]
async fn test_backfill_creates_unknown_entity() {
    let store = Arc::new(MemoryStore::new());
    let provider = Arc::new(ScriptedProvider::new());
    provider.set_phase(7, "AOT");
    provider.set_score(7, 4, 3);
    provider.set_occurrences(
        7,
        vec![
            goal("P1", 4, 10, "A. Scorer", &[]),
            goal("OT", 3, 20, "B. Winner", &["C. Helper"]),
        ],
    );

    let backfill = ReconcileSweep::new(
        Arc::clone(&store),
        provider.clone(),
        &config(),
        WriterRole::Backfill,
    )
    .unwrap();
    let report = backfill.backfill(&[7], kickoff() + Duration::days(2)).await;

    assert_eq!(report.refreshed, 1);
    assert!(report.failed.is_empty());
    let stored = store.get_entity(7).await.unwrap().unwrap();
    assert_eq!(stored.phase, CanonicalPhase::Finished);
    assert_eq!(stored.score.home, Some(4));
    assert_eq!(store.records_of(7).len(), 2);
}

#[tokio::test]
async fn test_sweep_picks_up_entity_after_live_poller_finishes_it() {
    let store = Arc::new(MemoryStore::new());
    store.insert_entity(Entity::scheduled(1, PARTITION, kickoff(), kickoff() - Duration::days(1)));
    let provider = Arc::new(ScriptedProvider::new());
    provider.set_phase(1, "P1");
    provider.set_occurrences(1, vec![goal("P1", 4, 10, "A. Scorer", &[])]);

    let cfg = config();
    let poller = PollScheduler::new(Arc::clone(&store), provider.clone(), &cfg);
    let sweep = ReconcileSweep::new(Arc::clone(&store), provider.clone(), &cfg, WriterRole::Sweep).unwrap();

    poller.tick_at(kickoff() + Duration::minutes(1)).await.unwrap();
    let during = sweep.run_once(kickoff() + Duration::minutes(2)).await.unwrap();
    assert_eq!(during.skipped_live, 1);

    provider.set_phase(1, "FT");
    provider.set_occurrences(
        1,
        vec![
            goal("P1", 4, 10, "A. Scorer", &["B. Helper"]),
            goal("P3", 19, 20, "D. Late", &[]),
        ],
    );
    poller.tick_at(kickoff() + Duration::hours(2)).await.unwrap();

    let after = sweep.run_once(kickoff() + Duration::hours(3)).await.unwrap();
    assert_eq!(after.refreshed, 1);
    assert_eq!(after.records.unchanged, 2);
    assert_eq!(store.records_of(1).len(), 2);
}

#[test]
fn test_secondary_roles_are_distinct_from_live() {
    assert!(!WriterRole::Live.is_secondary());
    assert!(WriterRole::Sweep.is_secondary());
    assert!(WriterRole::Backfill.is_secondary());
}
