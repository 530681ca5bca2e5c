use crate::domain::{CanonicalPhase, Entity, EntityId, EntitySnapshot, Score};
use crate::engine::classifier::StatusClassifier;
use crate::error::Result;
use crate::store::EntityStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Writes provider snapshots onto stored entities.
///
/// The canonical phase never moves backwards: a snapshot that reports an
/// earlier phase than the stored one keeps the stored phase and phase code.
pub struct EntityUpserter<S> {
    store: Arc<S>,
    classifier: StatusClassifier,
}

impl<S: EntityStore> EntityUpserter<S> {
    pub fn new(store: Arc<S>, classifier: StatusClassifier) -> Self {
        Self { store, classifier }
    }

    pub fn classifier(&self) -> &StatusClassifier {
        &self.classifier
    }

    /// Merge a snapshot into the stored entity and return the row as stored.
    #[instrument(skip(self, snapshot), fields(entity_id = snapshot.id, code = %snapshot.phase_code))]
    pub async fn apply(&self, snapshot: &EntitySnapshot, now: DateTime<Utc>) -> Result<Entity> {
        let observed = self
            .classifier
            .classify(&snapshot.phase_code, snapshot.scheduled_start, now);
        let existing = self.store.get_entity(snapshot.id).await?;
        let entity = merge_snapshot(existing.as_ref(), snapshot, observed, now);

        if let Some(prev) = existing.as_ref() {
            if prev.phase > observed {
                debug!(
                    stored = %prev.phase,
                    observed = %observed,
                    "provider reported an earlier phase, keeping stored phase"
                );
            } else if prev.phase != entity.phase {
                info!(from = %prev.phase, to = %entity.phase, "phase advanced");
            }
        }

        self.store.upsert_entity(&entity).await
    }

    /// Force a stuck NOT_STARTED entity to LIVE. No-op for any other phase.
    pub async fn force_live(&self, entity_id: EntityId, now: DateTime<Utc>) -> Result<Option<Entity>> {
        let Some(mut entity) = self.store.get_entity(entity_id).await? else {
            return Ok(None);
        };
        if entity.phase != CanonicalPhase::NotStarted {
            return Ok(Some(entity));
        }

        info!(entity_id, code = %entity.phase_code, "occurrences present, forcing phase to LIVE");
        entity.phase = CanonicalPhase::Live;
        entity.last_updated = now;
        self.store.upsert_entity(&entity).await.map(Some)
    }
}

fn merge_snapshot(
    existing: Option<&Entity>,
    snapshot: &EntitySnapshot,
    observed: CanonicalPhase,
    now: DateTime<Utc>,
) -> Entity {
    let Some(prev) = existing else {
        return Entity {
            id: snapshot.id,
            partition_id: snapshot.partition_id,
            scheduled_start: snapshot.scheduled_start,
            phase_code: snapshot.phase_code.clone(),
            phase: observed,
            score: snapshot.score,
            clock: snapshot.clock.clone(),
            raw: Some(snapshot.raw.clone()),
            last_updated: now,
        };
    };

    let stale = prev.phase > observed;
    Entity {
        id: snapshot.id,
        partition_id: snapshot.partition_id,
        scheduled_start: snapshot.scheduled_start,
        phase_code: if stale {
            prev.phase_code.clone()
        } else {
            snapshot.phase_code.clone()
        },
        phase: prev.phase.advance(observed),
        score: Score {
            home: snapshot.score.home.or(prev.score.home),
            away: snapshot.score.away.or(prev.score.away),
        },
        clock: snapshot.clock.clone().or_else(|| prev.clock.clone()),
        raw: Some(snapshot.raw.clone()),
        last_updated: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn snapshot(code: &str, home: Option<i32>) -> EntitySnapshot {
        EntitySnapshot {
            id: 9,
            partition_id: 57,
            scheduled_start: Utc.with_ymd_and_hms(2025, 1, 5, 18, 0, 0).unwrap(),
            phase_code: code.to_string(),
            score: Score { home, away: Some(0) },
            clock: None,
            raw: json!({ "status": code }),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 5, 18, 30, 0).unwrap()
    }

    #[test]
    fn test_first_sighting_uses_observed_phase() {
        let e = merge_snapshot(None, &snapshot("P1", Some(1)), CanonicalPhase::Live, now());
        assert_eq!(e.phase, CanonicalPhase::Live);
        assert_eq!(e.phase_code, "P1");
    }

    #[test]
    fn test_stale_snapshot_keeps_stored_phase_and_score() {
        let stored = merge_snapshot(None, &snapshot("P2", Some(2)), CanonicalPhase::Live, now());
        let e = merge_snapshot(Some(&stored), &snapshot("NS", None), CanonicalPhase::NotStarted, now());
        assert_eq!(e.phase, CanonicalPhase::Live);
        assert_eq!(e.phase_code, "P2");
        assert_eq!(e.score.home, Some(2));
    }

    #[test]
    fn test_finished_is_terminal() {
        let stored = merge_snapshot(None, &snapshot("FT", Some(3)), CanonicalPhase::Finished, now());
        let e = merge_snapshot(Some(&stored), &snapshot("P3", Some(3)), CanonicalPhase::Live, now());
        assert_eq!(e.phase, CanonicalPhase::Finished);
        assert_eq!(e.phase_code, "FT");
    }
}
