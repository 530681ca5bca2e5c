//! Column inventory of the sync tables, read once at startup.
//!
//! Deployments that predate a column keep working: optional columns are
//! only written when the live schema has them.

use crate::error::{Result, SyncError};
use sqlx::{PgPool, Row};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

pub const ENTITIES: &str = "entities";
pub const POLL_STATE: &str = "entity_poll_state";
pub const EVENT_RECORDS: &str = "event_records";

const REQUIRED: &[(&str, &[&str])] = &[
    (
        ENTITIES,
        &[
            "id",
            "partition_id",
            "scheduled_start",
            "phase_code",
            "canonical_phase",
            "phase_rank",
            "score_home",
            "score_away",
            "last_updated",
        ],
    ),
    (
        POLL_STATE,
        &[
            "entity_id",
            "pre_called_at",
            "start_called_at",
            "end_called_at",
            "post_called_at",
            "finished_at",
            "next_live_poll_at",
            "updated_at",
        ],
    ),
    (
        EVENT_RECORDS,
        &[
            "entity_id",
            "fingerprint",
            "kind",
            "period",
            "time_offset",
            "side",
            "detail",
            "participants",
            "assists",
            "sort_order",
            "raw_payload",
            "first_seen_at",
            "updated_at",
        ],
    ),
];

/// Columns that may be absent on older schemas.
pub const OPTIONAL_ENTITY_COLUMNS: &[&str] = &["clock", "raw_payload"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaDescription {
    tables: HashMap<String, HashSet<String>>,
}

impl SchemaDescription {
    pub fn from_columns<I, T, C>(columns: I) -> Self
    where
        I: IntoIterator<Item = (T, C)>,
        T: Into<String>,
        C: Into<String>,
    {
        let mut tables: HashMap<String, HashSet<String>> = HashMap::new();
        for (table, column) in columns {
            tables.entry(table.into()).or_default().insert(column.into());
        }
        Self { tables }
    }

    /// Every column the current migrations create.
    pub fn complete() -> Self {
        let mut columns: Vec<(&str, &str)> = REQUIRED
            .iter()
            .flat_map(|(table, cols)| cols.iter().map(move |c| (*table, *c)))
            .collect();
        columns.extend(OPTIONAL_ENTITY_COLUMNS.iter().map(|c| (ENTITIES, *c)));
        Self::from_columns(columns)
    }

    /// Read the column inventory of the sync tables from `information_schema`.
    pub async fn load(pool: &PgPool) -> Result<Self> {
        let rows = sqlx::query(
            r#"
            SELECT table_name::text AS table_name, column_name::text AS column_name
            FROM information_schema.columns
            WHERE table_schema = current_schema()
              AND table_name = ANY($1)
            "#,
        )
        .bind(
            [ENTITIES, POLL_STATE, EVENT_RECORDS]
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<String>>(),
        )
        .fetch_all(pool)
        .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let table: String = row.try_get("table_name")?;
            let column: String = row.try_get("column_name")?;
            columns.push((table, column));
        }
        let schema = Self::from_columns(columns);

        for column in OPTIONAL_ENTITY_COLUMNS {
            if !schema.has_column(ENTITIES, column) {
                warn!(column, "optional entities column missing, it will not be written");
            }
        }
        info!(tables = schema.tables.len(), "loaded schema description");
        Ok(schema)
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(table)
            .map_or(false, |cols| cols.contains(column))
    }

    /// `table.column` names the engine cannot run without.
    pub fn missing_required(&self) -> Vec<String> {
        REQUIRED
            .iter()
            .flat_map(|(table, cols)| {
                cols.iter()
                    .filter(move |c| !self.has_column(table, c))
                    .map(move |c| format!("{table}.{c}"))
            })
            .collect()
    }

    pub fn ensure_required(&self) -> Result<()> {
        let missing = self.missing_required();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Validation(format!(
                "schema is missing {}; run `fixture-sync migrate`",
                missing.join(", ")
            )))
        }
    }
}
