//! Storage seams shared by the scheduler, upserter and reconciler.
//!
//! Implemented by [`crate::adapters::PostgresStore`] in production and
//! [`crate::adapters::MemoryStore`] in tests.

use crate::domain::{
    Entity, EntityId, EventRecord, OneShot, PartitionId, PollMark, PollState,
};
use crate::engine::window::CandidateWindow;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A candidate entity together with its poll state, if one exists yet
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub entity: Entity,
    pub poll: Option<PollState>,
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn get_entity(&self, id: EntityId) -> Result<Option<Entity>>;

    /// Insert or update an entity. The stored canonical phase never regresses;
    /// the row as stored after the write is returned.
    async fn upsert_entity(&self, entity: &Entity) -> Result<Entity>;

    /// Entities inside the window, ordered by scheduled start, capped at `window.limit`.
    async fn select_candidates(&self, window: &CandidateWindow) -> Result<Vec<Candidate>>;

    /// Entities of the given partitions that started in `[since, until]`.
    async fn entities_started_between(
        &self,
        partitions: &[PartitionId],
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Entity>>;
}

#[async_trait]
pub trait PollStateStore: Send + Sync {
    async fn get_or_create(&self, id: EntityId, now: DateTime<Utc>) -> Result<PollState>;

    /// Apply a mark. One-shot fields are only written when still null.
    async fn mark(&self, id: EntityId, mark: PollMark, now: DateTime<Utc>) -> Result<PollState>;

    /// Null out one-shot fields. Operator correction path only.
    async fn clear_marks(
        &self,
        id: EntityId,
        actions: &[OneShot],
        now: DateTime<Utc>,
    ) -> Result<Option<PollState>>;
}

#[async_trait]
pub trait EventRecordStore: Send + Sync {
    async fn list_records(&self, entity_id: EntityId) -> Result<Vec<EventRecord>>;

    /// Insert or merge by `(entity_id, fingerprint)`.
    async fn upsert_record(&self, record: &EventRecord) -> Result<()>;

    async fn delete_records(&self, entity_id: EntityId, fingerprints: &[String]) -> Result<u64>;
}

/// Everything the engine needs from storage.
pub trait SyncStore: EntityStore + PollStateStore + EventRecordStore {}

impl<T: EntityStore + PollStateStore + EventRecordStore> SyncStore for T {}
