use super::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One in-match occurrence (goal, penalty, ...) as the provider reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub kind: String,
    pub period: String,
    /// Minute within the match, when reported
    pub time_offset: Option<i32>,
    /// Acting team id
    pub side: Option<i64>,
    pub detail: Option<String>,
    /// Primary participants, part of the occurrence identity
    pub participants: Vec<String>,
    /// Secondary participants, filled in late by the provider
    pub assists: Vec<String>,
    pub raw: serde_json::Value,
}

/// Durable form of an occurrence, keyed by `(entity_id, fingerprint)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub entity_id: EntityId,
    pub fingerprint: String,
    pub kind: String,
    pub period: String,
    pub time_offset: Option<i32>,
    pub side: Option<i64>,
    pub detail: Option<String>,
    pub participants: Vec<String>,
    pub assists: Vec<String>,
    /// Sort key, stable across refetches of the same occurrence
    pub order: i64,
    pub raw: serde_json::Value,
    pub first_seen_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventRecord {
    /// Equality on the fields a snapshot can change; timestamps excluded.
    pub fn same_content(&self, other: &EventRecord) -> bool {
        self.kind == other.kind
            && self.period == other.period
            && self.time_offset == other.time_offset
            && self.side == other.side
            && self.detail == other.detail
            && self.participants == other.participants
            && self.assists == other.assists
            && self.order == other.order
            && self.raw == other.raw
    }
}
