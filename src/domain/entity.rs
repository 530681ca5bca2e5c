use super::CanonicalPhase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type EntityId = i64;
pub type PartitionId = i64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub home: Option<i32>,
    pub away: Option<i32>,
}

/// Entity state as reported by one provider fetch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub partition_id: PartitionId,
    pub scheduled_start: DateTime<Utc>,
    /// Phase code exactly as the provider sent it
    pub phase_code: String,
    pub score: Score,
    /// Provider game clock, if any
    pub clock: Option<String>,
    pub raw: serde_json::Value,
}

/// A tracked match as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub partition_id: PartitionId,
    pub scheduled_start: DateTime<Utc>,
    pub phase_code: String,
    pub phase: CanonicalPhase,
    pub score: Score,
    pub clock: Option<String>,
    pub raw: Option<serde_json::Value>,
    pub last_updated: DateTime<Utc>,
}

impl Entity {
    /// A fresh entity seen for the first time, before any phase classification.
    pub fn scheduled(
        id: EntityId,
        partition_id: PartitionId,
        scheduled_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            partition_id,
            scheduled_start,
            phase_code: "NS".to_string(),
            phase: CanonicalPhase::NotStarted,
            score: Score::default(),
            clock: None,
            raw: None,
            last_updated: now,
        }
    }
}
