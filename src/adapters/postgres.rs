use crate::domain::{
    CanonicalPhase, Entity, EntityId, EventRecord, OneShot, PartitionId, PollMark, PollState,
    Score,
};
use crate::engine::window::CandidateWindow;
use crate::error::{Result, SyncError};
use crate::schema::{SchemaDescription, ENTITIES};
use crate::store::{Candidate, EntityStore, EventRecordStore, PollStateStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

/// PostgreSQL storage adapter
///
/// Statements touching optional `entities` columns are built once from the
/// injected [`SchemaDescription`].
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    has_clock: bool,
    has_raw: bool,
    entity_upsert_sql: String,
}

const POLL_COLUMNS: &str = "entity_id, pre_called_at, start_called_at, end_called_at, \
     post_called_at, finished_at, next_live_poll_at, updated_at";

const RECORD_COLUMNS: &str = "entity_id, fingerprint, kind, period, time_offset, side, detail, \
     participants, assists, sort_order, raw_payload, first_seen_at, updated_at";

impl PostgresStore {
    /// Connect a pool without a schema description. Used for `migrate`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(pool)
    }

    /// Create a store over an existing pool and a schema read at startup
    pub fn new(pool: PgPool, schema: &SchemaDescription) -> Self {
        let has_clock = schema.has_column(ENTITIES, "clock");
        let has_raw = schema.has_column(ENTITIES, "raw_payload");
        Self {
            entity_upsert_sql: entity_upsert_sql(has_clock, has_raw),
            pool,
            has_clock,
            has_raw,
        }
    }

    /// Run migrations
    pub async fn migrate(pool: &PgPool) -> Result<()> {
        sqlx::migrate!("./migrations").run(pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn entity_select(&self, alias: &str) -> String {
        let clock = if self.has_clock {
            format!("{alias}.clock")
        } else {
            "NULL::text AS clock".to_string()
        };
        let raw = if self.has_raw {
            format!("{alias}.raw_payload")
        } else {
            "NULL::jsonb AS raw_payload".to_string()
        };
        format!(
            "{alias}.id, {alias}.partition_id, {alias}.scheduled_start, {alias}.phase_code, \
             {alias}.canonical_phase, {alias}.score_home, {alias}.score_away, {clock}, {raw}, \
             {alias}.last_updated"
        )
    }
}

/// INSERT .. ON CONFLICT for entities. The phase rank only moves forward
/// and the phase code follows it.
fn entity_upsert_sql(has_clock: bool, has_raw: bool) -> String {
    let mut columns = vec![
        "id",
        "partition_id",
        "scheduled_start",
        "phase_code",
        "canonical_phase",
        "phase_rank",
        "score_home",
        "score_away",
        "last_updated",
    ];
    let mut updates = vec![
        "partition_id = EXCLUDED.partition_id".to_string(),
        "scheduled_start = EXCLUDED.scheduled_start".to_string(),
        "phase_code = CASE WHEN EXCLUDED.phase_rank >= entities.phase_rank \
         THEN EXCLUDED.phase_code ELSE entities.phase_code END"
            .to_string(),
        "canonical_phase = CASE WHEN EXCLUDED.phase_rank >= entities.phase_rank \
         THEN EXCLUDED.canonical_phase ELSE entities.canonical_phase END"
            .to_string(),
        "phase_rank = GREATEST(entities.phase_rank, EXCLUDED.phase_rank)".to_string(),
        "score_home = COALESCE(EXCLUDED.score_home, entities.score_home)".to_string(),
        "score_away = COALESCE(EXCLUDED.score_away, entities.score_away)".to_string(),
        "last_updated = EXCLUDED.last_updated".to_string(),
    ];
    if has_clock {
        columns.push("clock");
        updates.push("clock = COALESCE(EXCLUDED.clock, entities.clock)".to_string());
    }
    if has_raw {
        columns.push("raw_payload");
        updates.push("raw_payload = COALESCE(EXCLUDED.raw_payload, entities.raw_payload)".to_string());
    }

    let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO entities ({}) VALUES ({}) ON CONFLICT (id) DO UPDATE SET {} RETURNING id",
        columns.join(", "),
        placeholders.join(", "),
        updates.join(", ")
    )
}

fn one_shot_column(action: OneShot) -> &'static str {
    match action {
        OneShot::Pre => "pre_called_at",
        OneShot::Start => "start_called_at",
        OneShot::End => "end_called_at",
        OneShot::Post => "post_called_at",
    }
}

fn entity_from_row(row: &PgRow) -> Result<Entity> {
    let phase: String = row.try_get("canonical_phase")?;
    Ok(Entity {
        id: row.try_get("id")?,
        partition_id: row.try_get("partition_id")?,
        scheduled_start: row.try_get("scheduled_start")?,
        phase_code: row.try_get("phase_code")?,
        phase: phase
            .parse::<CanonicalPhase>()
            .map_err(SyncError::Internal)?,
        score: Score {
            home: row.try_get("score_home")?,
            away: row.try_get("score_away")?,
        },
        clock: row.try_get("clock")?,
        raw: row.try_get("raw_payload")?,
        last_updated: row.try_get("last_updated")?,
    })
}

fn poll_from_row(row: &PgRow, prefix: &str) -> Result<PollState> {
    let col = |name: &str| format!("{prefix}{name}");
    Ok(PollState {
        entity_id: row.try_get(col("entity_id").as_str())?,
        pre_called_at: row.try_get(col("pre_called_at").as_str())?,
        start_called_at: row.try_get(col("start_called_at").as_str())?,
        end_called_at: row.try_get(col("end_called_at").as_str())?,
        post_called_at: row.try_get(col("post_called_at").as_str())?,
        finished_at: row.try_get(col("finished_at").as_str())?,
        next_live_poll_at: row.try_get(col("next_live_poll_at").as_str())?,
        updated_at: row.try_get(col("updated_at").as_str())?,
    })
}

fn record_from_row(row: &PgRow) -> Result<EventRecord> {
    Ok(EventRecord {
        entity_id: row.try_get("entity_id")?,
        fingerprint: row.try_get("fingerprint")?,
        kind: row.try_get("kind")?,
        period: row.try_get("period")?,
        time_offset: row.try_get("time_offset")?,
        side: row.try_get("side")?,
        detail: row.try_get("detail")?,
        participants: row.try_get("participants")?,
        assists: row.try_get("assists")?,
        order: row.try_get("sort_order")?,
        raw: row.try_get("raw_payload")?,
        first_seen_at: row.try_get("first_seen_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ==================== Entities ====================

#[async_trait]
impl EntityStore for PostgresStore {
    async fn get_entity(&self, id: EntityId) -> Result<Option<Entity>> {
        let sql = format!("SELECT {} FROM entities e WHERE e.id = $1", self.entity_select("e"));
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(entity_from_row).transpose()
    }

    #[instrument(skip(self, entity), fields(entity_id = entity.id, phase = %entity.phase))]
    async fn upsert_entity(&self, entity: &Entity) -> Result<Entity> {
        let mut query = sqlx::query(&self.entity_upsert_sql)
            .bind(entity.id)
            .bind(entity.partition_id)
            .bind(entity.scheduled_start)
            .bind(&entity.phase_code)
            .bind(entity.phase.as_str())
            .bind(entity.phase.rank())
            .bind(entity.score.home)
            .bind(entity.score.away)
            .bind(entity.last_updated);
        if self.has_clock {
            query = query.bind(entity.clock.as_deref());
        }
        if self.has_raw {
            query = query.bind(entity.raw.clone());
        }
        query.execute(&self.pool).await?;

        self.get_entity(entity.id)
            .await?
            .ok_or(SyncError::EntityNotFound(entity.id))
    }

    async fn select_candidates(&self, window: &CandidateWindow) -> Result<Vec<Candidate>> {
        let sql = format!(
            r#"
            SELECT {},
                   p.entity_id AS poll_entity_id,
                   p.pre_called_at AS poll_pre_called_at,
                   p.start_called_at AS poll_start_called_at,
                   p.end_called_at AS poll_end_called_at,
                   p.post_called_at AS poll_post_called_at,
                   p.finished_at AS poll_finished_at,
                   p.next_live_poll_at AS poll_next_live_poll_at,
                   p.updated_at AS poll_updated_at
            FROM entities e
            LEFT JOIN entity_poll_state p ON p.entity_id = e.id
            WHERE e.partition_id = ANY($1)
              AND (
                    (e.scheduled_start >= $2 AND e.scheduled_start <= $3)
                 OR (e.scheduled_start >= $4 AND e.scheduled_start <= $5
                     AND e.canonical_phase <> 'FINISHED')
                 OR (p.start_called_at IS NOT NULL AND p.finished_at IS NULL)
                 OR (p.finished_at IS NOT NULL AND p.post_called_at IS NULL)
              )
            ORDER BY e.scheduled_start ASC, e.id ASC
            LIMIT $6
            "#,
            self.entity_select("e")
        );

        let rows = sqlx::query(&sql)
            .bind(&window.partitions)
            .bind(window.now)
            .bind(window.upcoming_until)
            .bind(window.active_from)
            .bind(window.active_until)
            .bind(window.limit)
            .fetch_all(&self.pool)
            .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in &rows {
            let poll_id: Option<i64> = row.try_get("poll_entity_id")?;
            candidates.push(Candidate {
                entity: entity_from_row(row)?,
                poll: match poll_id {
                    Some(_) => Some(poll_from_row(row, "poll_")?),
                    None => None,
                },
            });
        }
        debug!(count = candidates.len(), "selected candidates");
        Ok(candidates)
    }

    async fn entities_started_between(
        &self,
        partitions: &[PartitionId],
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Entity>> {
        let sql = format!(
            r#"
            SELECT {} FROM entities e
            WHERE e.partition_id = ANY($1)
              AND e.scheduled_start >= $2 AND e.scheduled_start <= $3
            ORDER BY e.scheduled_start ASC, e.id ASC
            LIMIT $4
            "#,
            self.entity_select("e")
        );
        let rows = sqlx::query(&sql)
            .bind(partitions.to_vec())
            .bind(since)
            .bind(until)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entity_from_row).collect()
    }
}

// ==================== Poll State ====================

#[async_trait]
impl PollStateStore for PostgresStore {
    async fn get_or_create(&self, id: EntityId, now: DateTime<Utc>) -> Result<PollState> {
        sqlx::query(
            r#"
            INSERT INTO entity_poll_state (entity_id, updated_at)
            VALUES ($1, $2)
            ON CONFLICT (entity_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let sql = format!("SELECT {POLL_COLUMNS} FROM entity_poll_state WHERE entity_id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_one(&self.pool).await?;
        poll_from_row(&row, "")
    }

    #[instrument(skip(self))]
    async fn mark(&self, id: EntityId, mark: PollMark, now: DateTime<Utc>) -> Result<PollState> {
        let (column, at, assignment) = match mark {
            PollMark::Called(action, at) => {
                let column = one_shot_column(action);
                let mut assignment =
                    format!("{column} = COALESCE(entity_poll_state.{column}, EXCLUDED.{column})");
                if action == OneShot::End {
                    assignment.push_str(
                        ", finished_at = COALESCE(entity_poll_state.finished_at, EXCLUDED.finished_at)",
                    );
                }
                (column, at, assignment)
            }
            PollMark::NextLivePoll(at) => (
                "next_live_poll_at",
                at,
                "next_live_poll_at = EXCLUDED.next_live_poll_at".to_string(),
            ),
        };
        let finished_at = match mark {
            PollMark::Called(OneShot::End, at) => Some(at),
            _ => None,
        };

        let sql = format!(
            r#"
            INSERT INTO entity_poll_state (entity_id, {column}, finished_at, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (entity_id) DO UPDATE SET
                {assignment},
                updated_at = EXCLUDED.updated_at
            RETURNING {POLL_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(at)
            .bind(finished_at)
            .bind(now)
            .fetch_one(&self.pool)
            .await?;
        poll_from_row(&row, "")
    }

    async fn clear_marks(
        &self,
        id: EntityId,
        actions: &[OneShot],
        now: DateTime<Utc>,
    ) -> Result<Option<PollState>> {
        if actions.is_empty() {
            let sql = format!("SELECT {POLL_COLUMNS} FROM entity_poll_state WHERE entity_id = $1");
            let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
            return row.map(|r| poll_from_row(&r, "")).transpose();
        }

        let mut assignments: Vec<String> = actions
            .iter()
            .map(|a| format!("{} = NULL", one_shot_column(*a)))
            .collect();
        if actions.contains(&OneShot::End) {
            assignments.push("finished_at = NULL".to_string());
        }
        let sql = format!(
            "UPDATE entity_poll_state SET {}, updated_at = $2 WHERE entity_id = $1 RETURNING {POLL_COLUMNS}",
            assignments.join(", ")
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        info!(entity_id = id, ?actions, "cleared poll state marks");
        row.map(|r| poll_from_row(&r, "")).transpose()
    }
}

// ==================== Event Records ====================

#[async_trait]
impl EventRecordStore for PostgresStore {
    async fn list_records(&self, entity_id: EntityId) -> Result<Vec<EventRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM event_records WHERE entity_id = $1 ORDER BY sort_order ASC"
        );
        let rows = sqlx::query(&sql).bind(entity_id).fetch_all(&self.pool).await?;
        rows.iter().map(record_from_row).collect()
    }

    async fn upsert_record(&self, record: &EventRecord) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO event_records ({RECORD_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (entity_id, fingerprint) DO UPDATE SET
                kind = EXCLUDED.kind,
                period = EXCLUDED.period,
                time_offset = EXCLUDED.time_offset,
                side = EXCLUDED.side,
                detail = COALESCE(EXCLUDED.detail, event_records.detail),
                participants = CASE
                    WHEN cardinality(EXCLUDED.participants) >= cardinality(event_records.participants)
                    THEN EXCLUDED.participants ELSE event_records.participants END,
                assists = CASE
                    WHEN cardinality(EXCLUDED.assists) >= cardinality(event_records.assists)
                    THEN EXCLUDED.assists ELSE event_records.assists END,
                sort_order = EXCLUDED.sort_order,
                raw_payload = EXCLUDED.raw_payload,
                updated_at = EXCLUDED.updated_at
            "#
        );
        sqlx::query(&sql)
            .bind(record.entity_id)
            .bind(&record.fingerprint)
            .bind(&record.kind)
            .bind(&record.period)
            .bind(record.time_offset)
            .bind(record.side)
            .bind(record.detail.as_deref())
            .bind(&record.participants)
            .bind(&record.assists)
            .bind(record.order)
            .bind(&record.raw)
            .bind(record.first_seen_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_records(&self, entity_id: EntityId, fingerprints: &[String]) -> Result<u64> {
        if fingerprints.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            DELETE FROM event_records
            WHERE entity_id = $1 AND fingerprint = ANY($2)
            "#,
        )
        .bind(entity_id)
        .bind(fingerprints.to_vec())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_sql_follows_schema() {
        let full = entity_upsert_sql(true, true);
        assert!(full.contains("clock"));
        assert!(full.contains("raw_payload"));
        assert!(full.contains("$11"));

        let bare = entity_upsert_sql(false, false);
        assert!(!bare.contains("clock"));
        assert!(!bare.contains("raw_payload"));
        assert!(bare.contains("$9"));
        assert!(!bare.contains("$10"));
        assert!(bare.contains("GREATEST(entities.phase_rank, EXCLUDED.phase_rank)"));
    }

    #[test]
    fn test_one_shot_columns() {
        assert_eq!(one_shot_column(OneShot::Pre), "pre_called_at");
        assert_eq!(one_shot_column(OneShot::End), "end_called_at");
    }
}
