//! Merges a freshly fetched occurrence list into the stored event records.
//!
//! Each occurrence is keyed by a fingerprint over its defining fields (kind,
//! period, minute, acting side, detail, primary participants). Assists are
//! left out of the key because the provider fills them in minutes later; a
//! late assist updates the existing record in place.

use crate::config::ReconcilerConfig;
use crate::domain::{EntityId, EventRecord, Occurrence};
use crate::engine::race_guard::{GuardDecision, RaceGuard};
use crate::error::Result;
use crate::store::{EntityStore, EventRecordStore};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// What one reconcile pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: u64,
    /// The race guard refused the write
    pub skipped: bool,
}

impl ReconcileOutcome {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn changed(&self) -> bool {
        self.inserted > 0 || self.updated > 0 || self.deleted > 0
    }
}

// ==================== Fingerprinting ====================

fn clean(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn clean_list(values: &[String]) -> Vec<String> {
    values.iter().filter_map(|v| clean(v)).collect()
}

/// Canonical form used both for storage and for the fingerprint.
pub fn normalize(occurrence: &Occurrence) -> Occurrence {
    Occurrence {
        kind: clean(&occurrence.kind)
            .map(|k| k.to_lowercase())
            .unwrap_or_else(|| "unknown".to_string()),
        period: clean(&occurrence.period)
            .map(|p| p.to_uppercase())
            .unwrap_or_else(|| "UNK".to_string()),
        time_offset: occurrence.time_offset,
        side: occurrence.side.filter(|id| *id != 0),
        detail: occurrence.detail.as_deref().and_then(clean),
        participants: clean_list(&occurrence.participants),
        assists: clean_list(&occurrence.assists),
        raw: occurrence.raw.clone(),
    }
}

/// Stable signature of a normalized occurrence. Assists are excluded.
fn signature(occ: &Occurrence) -> String {
    let participants = occ
        .participants
        .iter()
        .map(|p| p.to_lowercase())
        .collect::<Vec<_>>()
        .join(",");
    format!(
        "{}|{}|{}|{}|{}|{}",
        occ.period,
        occ.time_offset.unwrap_or(-1),
        occ.side.unwrap_or(-1),
        occ.kind,
        occ.detail.as_deref().unwrap_or("").to_lowercase(),
        participants
    )
}

fn digest(signature: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(signature.as_bytes());
    hasher.finalize().into()
}

/// Rank of a period label for ordering: regulation periods by number,
/// then overtime, then shootout, unknown last.
fn period_rank(period: &str) -> i64 {
    if period.contains("SO") || period.contains("PEN") {
        return 9;
    }
    if period.contains("OT") || period.contains("ET") {
        return 8;
    }
    period
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse::<i64>()
        .map(|n| n.clamp(1, 7))
        .unwrap_or(15)
}

/// Sort key derived from the same fields as the fingerprint: period rank,
/// then minute (unknown minutes sort last), then a 31-bit hash tiebreak.
fn order_key(occ: &Occurrence, digest: &[u8; 32]) -> i64 {
    let minute = occ
        .time_offset
        .map(|m| i64::from(m).clamp(0, 0xFFFE))
        .unwrap_or(0xFFFF);
    let tiebreak = i64::from(u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) & 0x7FFF_FFFF);
    (period_rank(&occ.period) << 48) | (minute << 32) | tiebreak
}

/// Turn a snapshot into keyed records. Identical occurrences within one
/// snapshot get `#2`, `#3`... suffixes so none of them collapses.
pub fn fingerprint_snapshot(
    entity_id: EntityId,
    occurrences: &[Occurrence],
    now: DateTime<Utc>,
) -> Vec<EventRecord> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    occurrences
        .iter()
        .map(|raw| {
            let occ = normalize(raw);
            let sig = signature(&occ);
            let hash = digest(&sig);
            let base = hex::encode(hash);
            let count = seen.entry(base.clone()).or_insert(0);
            *count += 1;
            let fingerprint = if *count == 1 {
                base
            } else {
                format!("{base}#{count}")
            };

            EventRecord {
                entity_id,
                fingerprint,
                order: order_key(&occ, &hash),
                kind: occ.kind,
                period: occ.period,
                time_offset: occ.time_offset,
                side: occ.side,
                detail: occ.detail,
                participants: occ.participants,
                assists: occ.assists,
                raw: occ.raw,
                first_seen_at: now,
                updated_at: now,
            }
        })
        .collect()
}

fn longer(existing: &[String], incoming: &[String]) -> Vec<String> {
    if incoming.len() >= existing.len() {
        incoming.to_vec()
    } else {
        existing.to_vec()
    }
}

/// Merge rule for a record seen again: detail falls back to the stored
/// value, participant lists only grow.
pub fn merge_record(existing: &EventRecord, incoming: &EventRecord, now: DateTime<Utc>) -> EventRecord {
    EventRecord {
        detail: incoming.detail.clone().or_else(|| existing.detail.clone()),
        participants: longer(&existing.participants, &incoming.participants),
        assists: longer(&existing.assists, &incoming.assists),
        first_seen_at: existing.first_seen_at,
        updated_at: now,
        ..incoming.clone()
    }
}

// ==================== Reconciler ====================

pub struct SnapshotReconciler<S> {
    store: Arc<S>,
    guard: RaceGuard,
    volatile_kinds: HashSet<String>,
    purge_on_empty: bool,
}

impl<S> SnapshotReconciler<S>
where
    S: EntityStore + EventRecordStore,
{
    pub fn new(store: Arc<S>, guard: RaceGuard, config: &ReconcilerConfig) -> Self {
        Self {
            store,
            guard,
            volatile_kinds: config
                .volatile_kinds
                .iter()
                .map(|k| k.trim().to_lowercase())
                .collect(),
            purge_on_empty: config.purge_on_empty_snapshot,
        }
    }

    pub fn guard(&self) -> RaceGuard {
        self.guard
    }

    pub fn is_volatile(&self, kind: &str) -> bool {
        self.volatile_kinds.contains(&kind.trim().to_lowercase())
    }

    /// Bring the stored records of one entity in line with `occurrences`.
    ///
    /// Applying the same snapshot twice leaves the store unchanged.
    #[instrument(skip(self, occurrences), fields(count = occurrences.len(), role = %self.guard.role()))]
    pub async fn reconcile(
        &self,
        entity_id: EntityId,
        occurrences: &[Occurrence],
        now: DateTime<Utc>,
    ) -> Result<ReconcileOutcome> {
        let stored_entity = self.store.get_entity(entity_id).await?;
        if self.guard.check(stored_entity.as_ref()) == GuardDecision::Skip {
            info!(entity_id, "entity is live, leaving event records to the live poller");
            return Ok(ReconcileOutcome::skipped());
        }

        let incoming = fingerprint_snapshot(entity_id, occurrences, now);
        let existing: HashMap<String, EventRecord> = self
            .store
            .list_records(entity_id)
            .await?
            .into_iter()
            .map(|r| (r.fingerprint.clone(), r))
            .collect();

        let mut outcome = ReconcileOutcome::default();
        for record in &incoming {
            match existing.get(&record.fingerprint) {
                Some(current) => {
                    let merged = merge_record(current, record, now);
                    if merged.same_content(current) {
                        outcome.unchanged += 1;
                    } else {
                        self.store.upsert_record(&merged).await?;
                        outcome.updated += 1;
                    }
                }
                None => {
                    self.store.upsert_record(record).await?;
                    outcome.inserted += 1;
                }
            }
        }

        if incoming.is_empty() && !self.purge_on_empty {
            debug!(entity_id, "empty snapshot, keeping stored records");
            return Ok(outcome);
        }

        let keep: HashSet<&str> = incoming.iter().map(|r| r.fingerprint.as_str()).collect();
        let stale: Vec<String> = existing
            .values()
            .filter(|r| self.is_volatile(&r.kind) && !keep.contains(r.fingerprint.as_str()))
            .map(|r| r.fingerprint.clone())
            .collect();
        if !stale.is_empty() {
            outcome.deleted = self.store.delete_records(entity_id, &stale).await?;
            info!(entity_id, deleted = outcome.deleted, "removed retracted events");
        }

        debug!(
            entity_id,
            inserted = outcome.inserted,
            updated = outcome.updated,
            unchanged = outcome.unchanged,
            "reconciled snapshot"
        );
        Ok(outcome)
    }
}
