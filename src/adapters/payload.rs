//! Wire types for the provider's `games` and `games/events` endpoints.
//!
//! Every endpoint gets its own explicit shape. Required fields are
//! non-optional so a missing one fails decoding with [`SyncError::Decode`]
//! instead of being silently defaulted.

use crate::domain::{EntitySnapshot, Occurrence, Score};
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Response envelope shared by all endpoints
#[derive(Debug, Deserialize)]
pub struct Envelope {
    /// `[]` on success, an object or non-empty array of messages otherwise
    #[serde(default)]
    pub errors: Value,
    pub response: Vec<Value>,
}

impl Envelope {
    pub fn parse(endpoint: &str, body: Value) -> Result<Self> {
        let envelope: Envelope = serde_json::from_value(body)
            .map_err(|e| SyncError::Decode(format!("{endpoint} envelope: {e}")))?;

        let has_errors = match &envelope.errors {
            Value::Null => false,
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        };
        if has_errors {
            return Err(SyncError::ProviderRejected(format!(
                "{endpoint}: {}",
                envelope.errors
            )));
        }
        Ok(envelope)
    }
}

// ==================== games ====================

#[derive(Debug, Deserialize)]
pub struct GamePayload {
    pub id: i64,
    pub date: String,
    pub status: StatusPayload,
    pub league: LeagueRef,
    #[serde(default)]
    pub scores: Option<ScoresPayload>,
    #[serde(default)]
    pub timer: Option<ClockValue>,
}

#[derive(Debug, Deserialize)]
pub struct StatusPayload {
    pub short: Option<String>,
    #[serde(default)]
    pub long: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeagueRef {
    pub id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ScoresPayload {
    pub home: Option<ScoreSide>,
    pub away: Option<ScoreSide>,
}

/// Hockey reports plain totals, basketball a per-period breakdown.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ScoreSide {
    Points(i32),
    Breakdown { total: Option<i32> },
}

impl ScoreSide {
    fn total(&self) -> Option<i32> {
        match self {
            ScoreSide::Points(p) => Some(*p),
            ScoreSide::Breakdown { total } => *total,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ClockValue {
    Minute(i64),
    Text(String),
}

impl ClockValue {
    fn into_text(self) -> Option<String> {
        match self {
            ClockValue::Minute(m) => Some(m.to_string()),
            ClockValue::Text(t) if t.trim().is_empty() => None,
            ClockValue::Text(t) => Some(t.trim().to_string()),
        }
    }
}

fn parse_start(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::Decode(format!("game date {raw:?}: {e}")))
}

impl GamePayload {
    pub fn into_snapshot(self, raw: Value) -> Result<EntitySnapshot> {
        let phase_code = self
            .status
            .short
            .or(self.status.long)
            .unwrap_or_default()
            .trim()
            .to_string();
        let score = self
            .scores
            .map(|s| Score {
                home: s.home.as_ref().and_then(ScoreSide::total),
                away: s.away.as_ref().and_then(ScoreSide::total),
            })
            .unwrap_or_default();

        Ok(EntitySnapshot {
            id: self.id,
            partition_id: self.league.id,
            scheduled_start: parse_start(&self.date)?,
            phase_code,
            score,
            clock: self.timer.and_then(ClockValue::into_text),
            raw,
        })
    }
}

/// Decode a `games?id=` response. An empty `response` means the provider
/// does not know the entity.
pub fn decode_entity(body: Value) -> Result<Option<EntitySnapshot>> {
    let envelope = Envelope::parse("games", body)?;
    let Some(item) = envelope.response.into_iter().next() else {
        return Ok(None);
    };
    let game: GamePayload = serde_json::from_value(item.clone())
        .map_err(|e| SyncError::Decode(format!("game payload: {e}")))?;
    game.into_snapshot(item).map(Some)
}

// ==================== games/events ====================

#[derive(Debug, Deserialize)]
pub struct EventPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub period: String,
    #[serde(default)]
    pub minute: Option<MinuteValue>,
    #[serde(default)]
    pub team: Option<TeamRef>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub players: Option<Vec<Option<String>>>,
    #[serde(default)]
    pub assists: Option<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize)]
pub struct TeamRef {
    pub id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MinuteValue {
    Number(i32),
    Text(String),
}

impl MinuteValue {
    /// Leading integer of the minute, so `"60+2"` and `"05'"` keep their
    /// base minute. Anything without one is dropped rather than failing the
    /// snapshot, since the minute is not a required field.
    fn resolve(self) -> Option<i32> {
        match self {
            MinuteValue::Number(n) => Some(n),
            MinuteValue::Text(t) => {
                let trimmed = t.trim();
                if trimmed.is_empty() {
                    return None;
                }
                let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
                match digits.parse::<i32>() {
                    Ok(n) => Some(n),
                    Err(_) => {
                        warn!(minute = %trimmed, "unparseable event minute, storing without offset");
                        None
                    }
                }
            }
        }
    }
}

fn names(list: Option<Vec<Option<String>>>) -> Vec<String> {
    list.unwrap_or_default().into_iter().flatten().collect()
}

impl EventPayload {
    pub fn into_occurrence(self, raw: Value) -> Result<Occurrence> {
        Ok(Occurrence {
            kind: self.kind,
            period: self.period,
            time_offset: self.minute.and_then(MinuteValue::resolve),
            side: self.team.and_then(|t| t.id),
            detail: self.comment.or(self.detail),
            participants: names(self.players),
            assists: names(self.assists),
            raw,
        })
    }
}

/// Decode a `games/events?game=` response. Any bad item fails the whole
/// snapshot so nothing partial reaches the store.
pub fn decode_occurrences(body: Value) -> Result<Vec<Occurrence>> {
    let envelope = Envelope::parse("games/events", body)?;
    envelope
        .response
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let event: EventPayload = serde_json::from_value(item.clone())
                .map_err(|e| SyncError::Decode(format!("event #{i}: {e}")))?;
            event.into_occurrence(item)
        })
        .collect()
}
