//! Per-entity lifecycle state machine and the tick loop driving it.
//!
//! Each tick selects the candidate window, fans candidates out over a
//! bounded pool and evaluates, per entity and in this order:
//!
//! 1. pre: once, inside the pre-start window
//! 2. start: once, at or after scheduled start
//! 3. stuck recovery: NOT_STARTED long after start but occurrences exist
//! 4. live poll: repeating, gated by `next_live_poll_at`
//! 5. finish: once, when the phase turns FINISHED
//! 6. post: once, `post_window` after finish
//!
//! One-shot marks are written only after the fetch and the writes it
//! triggered succeeded, so a failed action is retried on a later tick.

use crate::adapters::provider::ProviderClient;
use crate::config::{AppConfig, SchedulerConfig};
use crate::domain::{
    CanonicalPhase, Entity, EntityId, OneShot, PollMark, PollState,
};
use crate::engine::classifier::StatusClassifier;
use crate::engine::race_guard::{RaceGuard, WriterRole};
use crate::engine::reconciler::{ReconcileOutcome, SnapshotReconciler};
use crate::engine::stuck::StuckRecoveryPolicy;
use crate::engine::tier::TierPolicy;
use crate::engine::upserter::EntityUpserter;
use crate::engine::window::CandidateWindow;
use crate::error::{Result, SyncError};
use crate::retry::{retry_transient, Backoff};
use crate::services::health::HealthState;
use crate::services::metrics::Metrics;
use crate::store::{Candidate, SyncStore};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Pre,
    Start,
    StuckRecovery,
    LivePoll,
    Finish,
    Post,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Pre => "pre",
            Action::Start => "start",
            Action::StuckRecovery => "stuck_recovery",
            Action::LivePoll => "live_poll",
            Action::Finish => "finish",
            Action::Post => "post",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What happened to one entity during a tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityReport {
    pub entity_id: EntityId,
    pub actions: Vec<Action>,
    pub provider_calls: u32,
    pub records: ReconcileOutcome,
}

impl EntityReport {
    fn absorb(&mut self, outcome: ReconcileOutcome) {
        self.records.inserted += outcome.inserted;
        self.records.updated += outcome.updated;
        self.records.unchanged += outcome.unchanged;
        self.records.deleted += outcome.deleted;
        self.records.skipped |= outcome.skipped;
    }
}

#[derive(Debug)]
enum EntityOutcome {
    Done(EntityReport),
    Gated,
    Failed { entity_id: EntityId, kind: &'static str },
}

/// Summary of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub at: Option<DateTime<Utc>>,
    pub candidates: usize,
    pub processed: usize,
    pub gated: usize,
    pub failed: usize,
    pub failed_entities: Vec<EntityId>,
    pub provider_calls: u32,
    pub actions: Vec<(EntityId, Action)>,
    pub records_inserted: usize,
    pub records_updated: usize,
    pub records_deleted: u64,
}

impl TickReport {
    pub fn fired(&self, entity_id: EntityId, action: Action) -> usize {
        self.actions
            .iter()
            .filter(|(id, a)| *id == entity_id && *a == action)
            .count()
    }
}

/// Working copy of one entity while its steps run
struct EntityTick {
    entity: Entity,
    poll: PollState,
    snapshot_fetched: bool,
    occurrences_fetched: bool,
    report: EntityReport,
}

pub struct PollScheduler<S> {
    store: Arc<S>,
    provider: Arc<dyn ProviderClient>,
    upserter: EntityUpserter<S>,
    reconciler: SnapshotReconciler<S>,
    tiers: TierPolicy,
    stuck: StuckRecoveryPolicy,
    config: SchedulerConfig,
    store_backoff: Backoff,
    /// Entities whose last tick failed, with the earliest retry time
    failure_gate: DashMap<EntityId, DateTime<Utc>>,
    metrics: Option<Arc<Metrics>>,
    health: Option<Arc<HealthState>>,
}

impl<S: SyncStore + 'static> PollScheduler<S> {
    pub fn new(store: Arc<S>, provider: Arc<dyn ProviderClient>, config: &AppConfig) -> Self {
        Self {
            upserter: EntityUpserter::new(
                Arc::clone(&store),
                StatusClassifier::new(&config.classifier),
            ),
            reconciler: SnapshotReconciler::new(
                Arc::clone(&store),
                RaceGuard::new(WriterRole::Live),
                &config.reconciler,
            ),
            tiers: TierPolicy::new(&config.scheduler),
            stuck: StuckRecoveryPolicy::new(&config.scheduler.stuck_recovery),
            config: config.scheduler.clone(),
            store_backoff: Backoff::default(),
            failure_gate: DashMap::new(),
            metrics: None,
            health: None,
            store,
            provider,
        }
    }

    pub fn with_stuck_policy(mut self, policy: StuckRecoveryPolicy) -> Self {
        self.stuck = policy;
        self
    }

    pub fn with_store_backoff(mut self, backoff: Backoff) -> Self {
        self.store_backoff = backoff;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_health(mut self, health: Arc<HealthState>) -> Self {
        self.health = Some(health);
        self
    }

    /// Run ticks until `shutdown` flips to true. Ticks never overlap.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            partitions = ?self.config.partitions,
            concurrency = self.config.worker_concurrency,
            stuck_recovery = self.stuck.is_enabled(),
            "Starting poll scheduler"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let pause = match self.tick_at(Utc::now()).await {
                Ok(report) => {
                    if report.candidates > 0 {
                        debug!(
                            candidates = report.candidates,
                            processed = report.processed,
                            failed = report.failed,
                            calls = report.provider_calls,
                            "tick complete"
                        );
                        self.config.tick_interval()
                    } else {
                        debug!("no candidates, idling");
                        self.config.idle_interval()
                    }
                }
                Err(e) => {
                    error!(error = %e, "tick failed");
                    std::time::Duration::from_secs(self.config.failure_backoff_secs.max(1))
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Poll scheduler stopped");
        Ok(())
    }

    /// One full tick evaluated at `now`.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        // Entities that left the window never clear their own entry
        self.failure_gate.retain(|_, retry_at| *retry_at > now);

        let window = CandidateWindow::at(now, &self.config);
        let candidates = self
            .store_write("select_candidates", || self.store.select_candidates(&window))
            .await?;

        let mut report = TickReport {
            at: Some(now),
            candidates: candidates.len(),
            ..TickReport::default()
        };

        let outcomes: Vec<EntityOutcome> = stream::iter(candidates)
            .map(|candidate| self.run_entity(candidate, now))
            .buffer_unordered(self.config.worker_concurrency.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                EntityOutcome::Done(entity) => {
                    report.processed += 1;
                    report.provider_calls += entity.provider_calls;
                    report.records_inserted += entity.records.inserted;
                    report.records_updated += entity.records.updated;
                    report.records_deleted += entity.records.deleted;
                    report
                        .actions
                        .extend(entity.actions.iter().map(|a| (entity.entity_id, *a)));
                }
                EntityOutcome::Gated => report.gated += 1,
                EntityOutcome::Failed { entity_id, kind } => {
                    report.failed += 1;
                    report.failed_entities.push(entity_id);
                    if let Some(m) = &self.metrics {
                        m.inc_failure(kind);
                    }
                }
            }
        }

        if let Some(m) = &self.metrics {
            m.record_tick(&report);
        }
        if let Some(h) = &self.health {
            h.record_tick(&report).await;
        }
        Ok(report)
    }

    fn failure_backoff(&self, entity: &Entity) -> Duration {
        self.config
            .failure_backoff()
            .min(self.tiers.interval_for(entity.partition_id))
    }

    async fn run_entity(&self, candidate: Candidate, now: DateTime<Utc>) -> EntityOutcome {
        let entity_id = candidate.entity.id;
        if let Some(retry_at) = self.failure_gate.get(&entity_id).map(|r| *r) {
            if now < retry_at {
                debug!(entity_id, %retry_at, "entity backing off after failure");
                return EntityOutcome::Gated;
            }
        }

        let backoff = self.failure_backoff(&candidate.entity);
        let live_eligible = !candidate.entity.phase.is_finished();

        match self.process_entity(candidate, now).await {
            Ok(report) => {
                self.failure_gate.remove(&entity_id);
                EntityOutcome::Done(report)
            }
            Err(e) => {
                warn!(entity_id, error = %e, kind = e.kind(), "entity skipped this tick");
                let retry_at = now + backoff;
                self.failure_gate.insert(entity_id, retry_at);
                if live_eligible {
                    if let Err(mark_err) = self
                        .store
                        .mark(entity_id, PollMark::NextLivePoll(retry_at), now)
                        .await
                    {
                        warn!(entity_id, error = %mark_err, "could not record failure backoff");
                    }
                }
                EntityOutcome::Failed {
                    entity_id,
                    kind: e.kind(),
                }
            }
        }
    }

    async fn process_entity(&self, candidate: Candidate, now: DateTime<Utc>) -> Result<EntityReport> {
        let entity_id = candidate.entity.id;
        let poll = match candidate.poll {
            Some(poll) => poll,
            None => {
                self.store_write("poll_state", || self.store.get_or_create(entity_id, now))
                    .await?
            }
        };
        let mut t = EntityTick {
            entity: candidate.entity,
            poll,
            snapshot_fetched: false,
            occurrences_fetched: false,
            report: EntityReport {
                entity_id,
                ..EntityReport::default()
            },
        };
        let start = t.entity.scheduled_start;

        // 1. pre
        if t.poll.pre_called_at.is_none() && now >= start - self.config.pre_window() && now < start
        {
            self.refresh_entity(&mut t, now).await?;
            self.mark(&mut t, PollMark::Called(OneShot::Pre, now), now).await?;
            self.fired(&mut t, Action::Pre);
        }

        // 2. start
        if t.poll.start_called_at.is_none() && now >= start && !t.entity.phase.is_finished() {
            self.refresh_entity(&mut t, now).await?;
            self.mark(&mut t, PollMark::Called(OneShot::Start, now), now).await?;
            self.fired(&mut t, Action::Start);
        }

        // 3. stuck recovery
        if self.stuck.should_probe(&t.entity, &t.poll, now) {
            let found = self.reconcile_occurrences(&mut t, now).await?;
            if found > 0 {
                if let Some(forced) = self
                    .store_write("force_live", || self.upserter.force_live(entity_id, now))
                    .await?
                {
                    t.entity = forced;
                }
                self.fired(&mut t, Action::StuckRecovery);
                if let Some(m) = &self.metrics {
                    m.inc_stuck_recoveries();
                }
            }
        }

        // 4. live poll
        if t.poll.start_called_at.is_some()
            && !t.entity.phase.is_finished()
            && t.poll.live_poll_due(now)
        {
            self.refresh_entity(&mut t, now).await?;
            if t.entity.phase != CanonicalPhase::NotStarted {
                self.reconcile_occurrences(&mut t, now).await?;
            }
            let next = now + self.tiers.interval_for(t.entity.partition_id);
            self.mark(&mut t, PollMark::NextLivePoll(next), now).await?;
            self.fired(&mut t, Action::LivePoll);
        }

        // 5. finish
        if t.entity.phase.is_finished() && t.poll.end_called_at.is_none() {
            self.refresh_entity(&mut t, now).await?;
            self.reconcile_occurrences(&mut t, now).await?;
            self.mark(&mut t, PollMark::Called(OneShot::End, now), now).await?;
            self.fired(&mut t, Action::Finish);
        }

        // 6. post
        if let Some(finished_at) = t.poll.finished_at {
            if t.poll.post_called_at.is_none() && now >= finished_at + self.config.post_window() {
                self.refresh_entity(&mut t, now).await?;
                self.reconcile_occurrences(&mut t, now).await?;
                self.mark(&mut t, PollMark::Called(OneShot::Post, now), now).await?;
                self.fired(&mut t, Action::Post);
            }
        }

        Ok(t.report)
    }

    fn fired(&self, t: &mut EntityTick, action: Action) {
        info!(
            entity_id = t.entity.id,
            action = %action,
            phase = %t.entity.phase,
            code = %t.entity.phase_code,
            "poll action"
        );
        t.report.actions.push(action);
        if let Some(m) = &self.metrics {
            m.inc_action(action);
        }
    }

    /// Fetch and store the entity snapshot, at most once per tick.
    async fn refresh_entity(&self, t: &mut EntityTick, now: DateTime<Utc>) -> Result<()> {
        if t.snapshot_fetched {
            return Ok(());
        }
        let entity_id = t.entity.id;
        t.snapshot_fetched = true;
        t.report.provider_calls += 1;
        if let Some(m) = &self.metrics {
            m.inc_provider_calls();
        }

        let snapshot = self
            .provider
            .fetch_entity(entity_id)
            .await?
            .ok_or_else(|| SyncError::ProviderRejected(format!("entity {entity_id} not returned")))?;
        if snapshot.id != entity_id {
            return Err(SyncError::Decode(format!(
                "asked for entity {entity_id}, provider returned {}",
                snapshot.id
            )));
        }

        t.entity = self
            .store_write("upsert_entity", || self.upserter.apply(&snapshot, now))
            .await?;
        Ok(())
    }

    /// Fetch occurrences and reconcile them, at most once per tick.
    /// Returns the number of occurrences in the snapshot.
    async fn reconcile_occurrences(&self, t: &mut EntityTick, now: DateTime<Utc>) -> Result<usize> {
        if t.occurrences_fetched {
            return Ok(0);
        }
        let entity_id = t.entity.id;
        t.occurrences_fetched = true;
        t.report.provider_calls += 1;
        if let Some(m) = &self.metrics {
            m.inc_provider_calls();
        }

        let occurrences = self.provider.fetch_occurrences(entity_id).await?;
        let outcome = self
            .store_write("reconcile", || {
                self.reconciler.reconcile(entity_id, &occurrences, now)
            })
            .await?;
        if let Some(m) = &self.metrics {
            m.record_reconcile(&outcome);
        }
        t.report.absorb(outcome);
        Ok(occurrences.len())
    }

    async fn mark(&self, t: &mut EntityTick, mark: PollMark, now: DateTime<Utc>) -> Result<()> {
        let entity_id = t.entity.id;
        t.poll = self
            .store_write("poll_mark", || self.store.mark(entity_id, mark, now))
            .await?;
        Ok(())
    }

    async fn store_write<T, F, Fut>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        retry_transient(label, self.config.store_retry_attempts, self.store_backoff, op).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;
    use crate::adapters::provider::MockProviderClient;
    use crate::domain::{EntitySnapshot, Score};
    use chrono::TimeZone;
    use serde_json::json;

    fn kickoff() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 14, 19, 0, 0).unwrap()
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.scheduler.partitions = vec![57];
        config
    }

    fn snapshot(id: EntityId, code: &str) -> EntitySnapshot {
        EntitySnapshot {
            id,
            partition_id: 57,
            scheduled_start: kickoff(),
            phase_code: code.to_string(),
            score: Score::default(),
            clock: None,
            raw: json!({ "id": id }),
        }
    }

    #[tokio::test]
    async fn test_failing_entity_does_not_block_others() {
        let store = Arc::new(MemoryStore::new());
        store.insert_entity(Entity::scheduled(1, 57, kickoff(), kickoff()));
        store.insert_entity(Entity::scheduled(2, 57, kickoff(), kickoff()));

        let mut provider = MockProviderClient::new();
        provider.expect_fetch_entity().returning(|id| {
            if id == 1 {
                Err(SyncError::ProviderUnavailable("503".into()))
            } else {
                Ok(Some(snapshot(id, "P1")))
            }
        });
        provider.expect_fetch_occurrences().returning(|_| Ok(Vec::new()));

        let scheduler = PollScheduler::new(Arc::clone(&store), Arc::new(provider), &config());
        let now = kickoff() + Duration::minutes(1);
        let report = scheduler.tick_at(now).await.unwrap();

        assert_eq!(report.candidates, 2);
        assert_eq!(report.failed_entities, vec![1]);
        assert_eq!(report.fired(2, Action::Start), 1);
        assert_eq!(report.fired(2, Action::LivePoll), 1);

        let failed = store.poll_state(1).unwrap();
        assert!(failed.start_called_at.is_none());
        assert_eq!(failed.next_live_poll_at, Some(now + Duration::seconds(5)));

        // Still inside the backoff: the failed entity is not retried
        let again = scheduler.tick_at(now + Duration::seconds(2)).await.unwrap();
        assert_eq!(again.gated, 1);
    }

    #[tokio::test]
    async fn test_unknown_entity_leaves_flags_unset() {
        let store = Arc::new(MemoryStore::new());
        store.insert_entity(Entity::scheduled(3, 57, kickoff(), kickoff()));

        let mut provider = MockProviderClient::new();
        provider.expect_fetch_entity().times(1).returning(|_| Ok(None));
        provider.expect_fetch_occurrences().never();

        let scheduler = PollScheduler::new(Arc::clone(&store), Arc::new(provider), &config());
        let report = scheduler
            .tick_at(kickoff() - Duration::minutes(30))
            .await
            .unwrap();

        assert_eq!(report.failed, 1);
        assert!(store.poll_state(3).unwrap().pre_called_at.is_none());
    }

    #[tokio::test]
    async fn test_malformed_payload_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        store.insert_entity(Entity::scheduled(4, 57, kickoff(), kickoff()));

        let mut provider = MockProviderClient::new();
        provider.expect_fetch_entity().returning(|id| Ok(Some(snapshot(id, "P2"))));
        provider
            .expect_fetch_occurrences()
            .returning(|_| Err(SyncError::Decode("event #0: missing field `type`".into())));

        let scheduler = PollScheduler::new(Arc::clone(&store), Arc::new(provider), &config());
        let report = scheduler
            .tick_at(kickoff() + Duration::minutes(1))
            .await
            .unwrap();

        assert_eq!(report.failed_entities, vec![4]);
        assert!(store.records_of(4).is_empty());
        // start mark was committed before the failing live poll
        assert!(store.poll_state(4).unwrap().start_called_at.is_some());
    }

    #[tokio::test]
    async fn test_expired_gate_entries_are_pruned() {
        let store = Arc::new(MemoryStore::new());
        store.insert_entity(Entity::scheduled(5, 57, kickoff(), kickoff()));

        let mut provider = MockProviderClient::new();
        provider
            .expect_fetch_entity()
            .times(1)
            .returning(|_| Err(SyncError::ProviderUnavailable("503".into())));

        let scheduler = PollScheduler::new(Arc::clone(&store), Arc::new(provider), &config());
        let now = kickoff() + Duration::minutes(1);
        scheduler.tick_at(now).await.unwrap();
        assert_eq!(scheduler.failure_gate.len(), 1);

        // Moved to a partition this poller does not own: never a candidate again
        store.insert_entity(Entity::scheduled(5, 99, kickoff(), kickoff()));
        let report = scheduler.tick_at(now + Duration::seconds(10)).await.unwrap();
        assert_eq!(report.candidates, 0);
        assert!(scheduler.failure_gate.is_empty());
    }
}
