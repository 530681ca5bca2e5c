//! In-process store used by tests.
//!
//! Applies the same write rules as the Postgres store: phase never
//! regresses, one-shot marks keep their first value, event records merge
//! on conflict.

use crate::domain::{Entity, EntityId, EventRecord, OneShot, PartitionId, PollMark, PollState};
use crate::engine::reconciler::merge_record;
use crate::engine::window::CandidateWindow;
use crate::error::Result;
use crate::store::{Candidate, EntityStore, EventRecordStore, PollStateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub struct MemoryStore {
    entities: DashMap<EntityId, Entity>,
    poll_states: DashMap<EntityId, PollState>,
    records: DashMap<EntityId, BTreeMap<String, EventRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entity directly, bypassing phase rules.
    pub fn insert_entity(&self, entity: Entity) {
        self.entities.insert(entity.id, entity);
    }

    pub fn poll_state(&self, id: EntityId) -> Option<PollState> {
        self.poll_states.get(&id).map(|p| p.clone())
    }

    /// Records of an entity ordered by their sort key.
    pub fn records_of(&self, id: EntityId) -> Vec<EventRecord> {
        let mut records: Vec<EventRecord> = self
            .records
            .get(&id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.order);
        records
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn get_entity(&self, id: EntityId) -> Result<Option<Entity>> {
        Ok(self.entities.get(&id).map(|e| e.clone()))
    }

    async fn upsert_entity(&self, entity: &Entity) -> Result<Entity> {
        let mut slot = self
            .entities
            .entry(entity.id)
            .or_insert_with(|| entity.clone());
        let phase = slot.phase.advance(entity.phase);
        let phase_code = if entity.phase < slot.phase {
            slot.phase_code.clone()
        } else {
            entity.phase_code.clone()
        };
        *slot = Entity {
            phase,
            phase_code,
            ..entity.clone()
        };
        Ok(slot.clone())
    }

    async fn select_candidates(&self, window: &CandidateWindow) -> Result<Vec<Candidate>> {
        let mut candidates: Vec<Candidate> = self
            .entities
            .iter()
            .filter_map(|e| {
                let poll = self.poll_states.get(e.key()).map(|p| p.clone());
                window.admits(e.value(), poll.as_ref()).then(|| Candidate {
                    entity: e.value().clone(),
                    poll,
                })
            })
            .collect();
        candidates.sort_by_key(|c| (c.entity.scheduled_start, c.entity.id));
        candidates.truncate(window.limit.max(0) as usize);
        Ok(candidates)
    }

    async fn entities_started_between(
        &self,
        partitions: &[PartitionId],
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Entity>> {
        let mut found: Vec<Entity> = self
            .entities
            .iter()
            .filter(|e| {
                partitions.contains(&e.partition_id)
                    && e.scheduled_start >= since
                    && e.scheduled_start <= until
            })
            .map(|e| e.value().clone())
            .collect();
        found.sort_by_key(|e| (e.scheduled_start, e.id));
        found.truncate(limit.max(0) as usize);
        Ok(found)
    }
}

#[async_trait]
impl PollStateStore for MemoryStore {
    async fn get_or_create(&self, id: EntityId, now: DateTime<Utc>) -> Result<PollState> {
        Ok(self
            .poll_states
            .entry(id)
            .or_insert_with(|| PollState::new(id, now))
            .clone())
    }

    async fn mark(&self, id: EntityId, mark: PollMark, now: DateTime<Utc>) -> Result<PollState> {
        let mut state = self
            .poll_states
            .entry(id)
            .or_insert_with(|| PollState::new(id, now));
        state.apply(mark, now);
        Ok(state.clone())
    }

    async fn clear_marks(
        &self,
        id: EntityId,
        actions: &[OneShot],
        now: DateTime<Utc>,
    ) -> Result<Option<PollState>> {
        Ok(self.poll_states.get_mut(&id).map(|mut state| {
            for action in actions {
                state.clear(*action, now);
            }
            state.clone()
        }))
    }
}

#[async_trait]
impl EventRecordStore for MemoryStore {
    async fn list_records(&self, entity_id: EntityId) -> Result<Vec<EventRecord>> {
        Ok(self.records_of(entity_id))
    }

    async fn upsert_record(&self, record: &EventRecord) -> Result<()> {
        let mut records = self.records.entry(record.entity_id).or_default();
        let merged = match records.get(&record.fingerprint) {
            Some(existing) => merge_record(existing, record, record.updated_at),
            None => record.clone(),
        };
        records.insert(record.fingerprint.clone(), merged);
        Ok(())
    }

    async fn delete_records(&self, entity_id: EntityId, fingerprints: &[String]) -> Result<u64> {
        let Some(mut records) = self.records.get_mut(&entity_id) else {
            return Ok(0);
        };
        let before = records.len();
        records.retain(|fp, _| !fingerprints.contains(fp));
        Ok((before - records.len()) as u64)
    }
}
