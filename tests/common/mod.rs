#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fixture_sync::adapters::{MemoryStore, ProviderClient};
use fixture_sync::config::AppConfig;
use fixture_sync::domain::{
    Entity, EntityId, EntitySnapshot, EventRecord, Occurrence, OneShot, PartitionId, PollMark,
    PollState, Score,
};
use fixture_sync::engine::window::CandidateWindow;
use fixture_sync::error::{Result, SyncError};
use fixture_sync::store::{Candidate, EntityStore, EventRecordStore, PollStateStore};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const PARTITION: i64 = 57;

pub fn kickoff() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 8, 19, 0, 0).unwrap()
}

pub fn config() -> AppConfig {
    let mut config = AppConfig::default();
    config.scheduler.partitions = vec![PARTITION];
    config
}

pub fn occurrence(kind: &str, period: &str, minute: i32, side: i64, who: &str, assists: &[&str]) -> Occurrence {
    Occurrence {
        kind: kind.to_string(),
        period: period.to_string(),
        time_offset: Some(minute),
        side: Some(side),
        detail: None,
        participants: vec![who.to_string()],
        assists: assists.iter().map(|a| a.to_string()).collect(),
        raw: json!({ "type": kind, "period": period, "minute": minute, "player": who }),
    }
}

pub fn goal(period: &str, minute: i32, side: i64, scorer: &str, assists: &[&str]) -> Occurrence {
    occurrence("goal", period, minute, side, scorer, assists)
}

/// Provider double answering from scripted state and counting calls.
#[derive(Default)]
pub struct ScriptedProvider {
    snapshots: Mutex<HashMap<EntityId, EntitySnapshot>>,
    occurrences: Mutex<HashMap<EntityId, Vec<Occurrence>>>,
    failing: Mutex<HashSet<EntityId>>,
    entity_calls: Mutex<HashMap<EntityId, usize>>,
    occurrence_calls: Mutex<HashMap<EntityId, usize>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_phase(&self, id: EntityId, code: &str) {
        let mut snapshots = self.snapshots.lock().unwrap();
        let snapshot = snapshots.entry(id).or_insert_with(|| EntitySnapshot {
            id,
            partition_id: PARTITION,
            scheduled_start: kickoff(),
            phase_code: code.to_string(),
            score: Score::default(),
            clock: None,
            raw: json!({ "id": id }),
        });
        snapshot.phase_code = code.to_string();
    }

    pub fn set_score(&self, id: EntityId, home: i32, away: i32) {
        if let Some(s) = self.snapshots.lock().unwrap().get_mut(&id) {
            s.score = Score {
                home: Some(home),
                away: Some(away),
            };
        }
    }

    pub fn set_occurrences(&self, id: EntityId, occurrences: Vec<Occurrence>) {
        self.occurrences.lock().unwrap().insert(id, occurrences);
    }

    pub fn fail(&self, id: EntityId) {
        self.failing.lock().unwrap().insert(id);
    }

    pub fn recover(&self, id: EntityId) {
        self.failing.lock().unwrap().remove(&id);
    }

    pub fn entity_calls(&self, id: EntityId) -> usize {
        self.entity_calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn occurrence_calls(&self, id: EntityId) -> usize {
        self.occurrence_calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn calls(&self, id: EntityId) -> usize {
        self.entity_calls(id) + self.occurrence_calls(id)
    }

    fn check(&self, id: EntityId) -> Result<()> {
        if self.failing.lock().unwrap().contains(&id) {
            return Err(SyncError::ProviderUnavailable(format!("503 for entity {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn fetch_entity(&self, entity_id: EntityId) -> Result<Option<EntitySnapshot>> {
        *self.entity_calls.lock().unwrap().entry(entity_id).or_insert(0) += 1;
        self.check(entity_id)?;
        Ok(self.snapshots.lock().unwrap().get(&entity_id).cloned())
    }

    async fn fetch_occurrences(&self, entity_id: EntityId) -> Result<Vec<Occurrence>> {
        *self.occurrence_calls.lock().unwrap().entry(entity_id).or_insert(0) += 1;
        self.check(entity_id)?;
        Ok(self
            .occurrences
            .lock()
            .unwrap()
            .get(&entity_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Scripted failures for one kind of write
#[derive(Default)]
struct FailPlan {
    left: usize,
    transient: bool,
}

impl FailPlan {
    fn next(&mut self) -> Result<()> {
        if self.left == 0 {
            return Ok(());
        }
        self.left -= 1;
        if self.transient {
            Err(SyncError::Database(sqlx::Error::PoolTimedOut))
        } else {
            Err(SyncError::Database(sqlx::Error::Protocol(
                "value violates check constraint".to_string(),
            )))
        }
    }
}

/// Memory store whose entity and record upserts fail on demand.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    entity_plan: Mutex<FailPlan>,
    record_plan: Mutex<FailPlan>,
    entity_attempts: AtomicUsize,
    record_attempts: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` entity upserts. Transient failures are pool timeouts.
    pub fn fail_entities(&self, n: usize, transient: bool) {
        *self.entity_plan.lock().unwrap() = FailPlan { left: n, transient };
    }

    pub fn fail_records(&self, n: usize, transient: bool) {
        *self.record_plan.lock().unwrap() = FailPlan { left: n, transient };
    }

    pub fn entity_attempts(&self) -> usize {
        self.entity_attempts.load(Ordering::SeqCst)
    }

    pub fn record_attempts(&self) -> usize {
        self.record_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EntityStore for FlakyStore {
    async fn get_entity(&self, id: EntityId) -> Result<Option<Entity>> {
        self.inner.get_entity(id).await
    }

    async fn upsert_entity(&self, entity: &Entity) -> Result<Entity> {
        self.entity_attempts.fetch_add(1, Ordering::SeqCst);
        self.entity_plan.lock().unwrap().next()?;
        self.inner.upsert_entity(entity).await
    }

    async fn select_candidates(&self, window: &CandidateWindow) -> Result<Vec<Candidate>> {
        self.inner.select_candidates(window).await
    }

    async fn entities_started_between(
        &self,
        partitions: &[PartitionId],
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Entity>> {
        self.inner
            .entities_started_between(partitions, since, until, limit)
            .await
    }
}

#[async_trait]
impl PollStateStore for FlakyStore {
    async fn get_or_create(&self, id: EntityId, now: DateTime<Utc>) -> Result<PollState> {
        self.inner.get_or_create(id, now).await
    }

    async fn mark(&self, id: EntityId, mark: PollMark, now: DateTime<Utc>) -> Result<PollState> {
        self.inner.mark(id, mark, now).await
    }

    async fn clear_marks(
        &self,
        id: EntityId,
        actions: &[OneShot],
        now: DateTime<Utc>,
    ) -> Result<Option<PollState>> {
        self.inner.clear_marks(id, actions, now).await
    }
}

#[async_trait]
impl EventRecordStore for FlakyStore {
    async fn list_records(&self, entity_id: EntityId) -> Result<Vec<EventRecord>> {
        self.inner.list_records(entity_id).await
    }

    async fn upsert_record(&self, record: &EventRecord) -> Result<()> {
        self.record_attempts.fetch_add(1, Ordering::SeqCst);
        self.record_plan.lock().unwrap().next()?;
        self.inner.upsert_record(record).await
    }

    async fn delete_records(&self, entity_id: EntityId, fingerprints: &[String]) -> Result<u64> {
        self.inner.delete_records(entity_id, fingerprints).await
    }
}
