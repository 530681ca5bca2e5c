//! One-shot marks against a store whose writes fail.

mod common;

use chrono::Duration;
use common::{config, goal, kickoff, FlakyStore, ScriptedProvider, PARTITION};
use fixture_sync::domain::Entity;
use fixture_sync::engine::{Action, PollScheduler};
use fixture_sync::retry::Backoff;
use std::sync::Arc;

fn seeded() -> Arc<FlakyStore> {
    let store = Arc::new(FlakyStore::new());
    store
        .inner
        .insert_entity(Entity::scheduled(1, PARTITION, kickoff(), kickoff() - Duration::days(1)));
    store
}

fn scheduler(
    store: &Arc<FlakyStore>,
    provider: &Arc<ScriptedProvider>,
) -> PollScheduler<FlakyStore> {
    PollScheduler::new(Arc::clone(store), provider.clone(), &config())
        .with_store_backoff(Backoff::new(1, 1))
}

#[tokio::test]
async fn test_transient_write_failure_is_retried_then_marked() {
    let store = seeded();
    let provider = Arc::new(ScriptedProvider::new());
    provider.set_phase(1, "P1");
    provider.set_occurrences(1, vec![goal("P1", 4, 10, "A. Scorer", &[])]);
    let scheduler = scheduler(&store, &provider);

    store.fail_entities(2, true);
    let now = kickoff() + Duration::minutes(1);
    let report = scheduler.tick_at(now).await.unwrap();

    assert!(report.failed_entities.is_empty());
    assert_eq!(report.fired(1, Action::Start), 1);
    assert_eq!(report.fired(1, Action::LivePoll), 1);
    // Two pool timeouts, then the write lands; the provider is not asked again
    assert_eq!(store.entity_attempts(), 3);
    assert_eq!(provider.entity_calls(1), 1);

    let poll = store.inner.poll_state(1).unwrap();
    assert_eq!(poll.start_called_at, Some(now));
    assert_eq!(store.inner.records_of(1).len(), 1);
}

#[tokio::test]
async fn test_retries_exhausted_leave_flag_unset() {
    let store = seeded();
    let provider = Arc::new(ScriptedProvider::new());
    provider.set_phase(1, "P1");
    let scheduler = scheduler(&store, &provider);

    store.fail_entities(3, true);
    let now = kickoff() + Duration::minutes(1);
    let report = scheduler.tick_at(now).await.unwrap();

    assert_eq!(report.failed_entities, vec![1]);
    assert_eq!(store.entity_attempts(), 3);
    assert!(store.inner.poll_state(1).unwrap().start_called_at.is_none());
}

#[tokio::test]
async fn test_permanent_write_failure_leaves_flags_unset_until_later_tick() {
    let store = seeded();
    let provider = Arc::new(ScriptedProvider::new());
    provider.set_phase(1, "NS");
    let scheduler = scheduler(&store, &provider);

    store.fail_entities(1, false);
    let first = kickoff() - Duration::minutes(30);
    let report = scheduler.tick_at(first).await.unwrap();

    assert_eq!(report.failed_entities, vec![1]);
    assert_eq!(report.fired(1, Action::Pre), 0);
    // Not transient: no second attempt within the tick
    assert_eq!(store.entity_attempts(), 1);
    let poll = store.inner.poll_state(1).unwrap();
    assert!(poll.pre_called_at.is_none());
    assert!(poll.start_called_at.is_none());

    let later = first + Duration::seconds(10);
    let report = scheduler.tick_at(later).await.unwrap();
    assert_eq!(report.fired(1, Action::Pre), 1);
    assert_eq!(store.inner.poll_state(1).unwrap().pre_called_at, Some(later));
}

#[tokio::test]
async fn test_failed_record_write_defers_live_poll() {
    let store = seeded();
    let provider = Arc::new(ScriptedProvider::new());
    provider.set_phase(1, "P1");
    let scheduler = scheduler(&store, &provider);
    let started = kickoff() + Duration::minutes(1);
    scheduler.tick_at(started).await.unwrap();

    provider.set_occurrences(1, vec![goal("P1", 4, 10, "A. Scorer", &[])]);
    store.fail_records(1, false);
    let failed_at = started + Duration::seconds(20);
    let report = scheduler.tick_at(failed_at).await.unwrap();

    assert_eq!(report.failed_entities, vec![1]);
    assert!(store.inner.records_of(1).is_empty());
    let poll = store.inner.poll_state(1).unwrap();
    assert_eq!(poll.next_live_poll_at, Some(failed_at + Duration::seconds(5)));

    let retry = failed_at + Duration::seconds(5);
    let report = scheduler.tick_at(retry).await.unwrap();
    assert_eq!(report.fired(1, Action::LivePoll), 1);
    assert_eq!(store.inner.records_of(1).len(), 1);
    assert_eq!(store.record_attempts(), 2);
}
