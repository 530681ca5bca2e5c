//! Secondary-role reconciliation: periodic sweep over recent entities and
//! one-off backfill of explicit ids.
//!
//! Both replay the same primitives as the live poller (entity upsert, then
//! snapshot reconciliation) but under a non-live [`WriterRole`], so entities
//! the live poller currently owns are left alone.

use crate::adapters::provider::ProviderClient;
use crate::config::{AppConfig, SweepConfig};
use crate::domain::{EntityId, PartitionId};
use crate::engine::classifier::StatusClassifier;
use crate::engine::race_guard::{GuardDecision, RaceGuard, WriterRole};
use crate::engine::reconciler::{ReconcileOutcome, SnapshotReconciler};
use crate::engine::upserter::EntityUpserter;
use crate::error::{Result, SyncError};
use crate::services::Metrics;
use crate::store::SyncStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Result of refreshing one entity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed(ReconcileOutcome),
    /// Entity is live; nothing was written
    SkippedLive,
    /// Provider does not know the entity
    Unknown,
}

/// Totals for one sweep or backfill pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub refreshed: usize,
    pub skipped_live: usize,
    pub unknown: usize,
    pub failed: Vec<EntityId>,
    pub records: ReconcileOutcome,
}

impl SweepReport {
    fn absorb(&mut self, id: EntityId, result: Result<RefreshOutcome>) {
        match result {
            Ok(RefreshOutcome::Refreshed(outcome)) => {
                self.refreshed += 1;
                self.records.inserted += outcome.inserted;
                self.records.updated += outcome.updated;
                self.records.unchanged += outcome.unchanged;
                self.records.deleted += outcome.deleted;
            }
            Ok(RefreshOutcome::SkippedLive) => self.skipped_live += 1,
            Ok(RefreshOutcome::Unknown) => self.unknown += 1,
            Err(e) => {
                warn!(entity_id = id, error = %e, kind = e.kind(), "refresh failed");
                self.failed.push(id);
            }
        }
    }
}

pub struct ReconcileSweep<S> {
    store: Arc<S>,
    provider: Arc<dyn ProviderClient>,
    upserter: EntityUpserter<S>,
    reconciler: SnapshotReconciler<S>,
    guard: RaceGuard,
    partitions: Vec<PartitionId>,
    cfg: SweepConfig,
    metrics: Option<Arc<Metrics>>,
}

impl<S: SyncStore + 'static> ReconcileSweep<S> {
    /// Build a sweep writing under `role`. Passing [`WriterRole::Live`] is
    /// rejected: only the poller writes as live.
    pub fn new(
        store: Arc<S>,
        provider: Arc<dyn ProviderClient>,
        config: &AppConfig,
        role: WriterRole,
    ) -> Result<Self> {
        if !role.is_secondary() {
            return Err(SyncError::Validation(
                "sweep and backfill must run under a secondary writer role".to_string(),
            ));
        }
        let guard = RaceGuard::new(role);
        Ok(Self {
            upserter: EntityUpserter::new(
                Arc::clone(&store),
                StatusClassifier::new(&config.classifier),
            ),
            reconciler: SnapshotReconciler::new(Arc::clone(&store), guard, &config.reconciler),
            guard,
            partitions: config.scheduler.partitions.clone(),
            cfg: config.sweep.clone(),
            metrics: None,
            store,
            provider,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn role(&self) -> WriterRole {
        self.guard.role()
    }

    /// Fetch the entity and its occurrences and write both, unless the
    /// entity is live.
    pub async fn refresh_entity(&self, id: EntityId, now: DateTime<Utc>) -> Result<RefreshOutcome> {
        let stored = self.store.get_entity(id).await?;
        if self.guard.check(stored.as_ref()) == GuardDecision::Skip {
            debug!(entity_id = id, role = %self.role(), "entity is live, skipping");
            return Ok(RefreshOutcome::SkippedLive);
        }

        let Some(snapshot) = self.provider.fetch_entity(id).await? else {
            info!(entity_id = id, "provider does not know entity");
            return Ok(RefreshOutcome::Unknown);
        };
        let entity = self.upserter.apply(&snapshot, now).await?;
        if self.guard.check(Some(&entity)) == GuardDecision::Skip {
            debug!(entity_id = id, "entity turned live, leaving records to the live poller");
            return Ok(RefreshOutcome::SkippedLive);
        }

        let occurrences = self.provider.fetch_occurrences(id).await?;
        let outcome = self.reconciler.reconcile(id, &occurrences, now).await?;
        if let Some(m) = &self.metrics {
            m.record_reconcile(&outcome);
        }
        if outcome.skipped {
            return Ok(RefreshOutcome::SkippedLive);
        }
        Ok(RefreshOutcome::Refreshed(outcome))
    }

    /// Refresh every configured-partition entity that started within the
    /// lookback window.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let since = now - Duration::hours(self.cfg.lookback_hours);
        let entities = self
            .store
            .entities_started_between(&self.partitions, since, now, self.cfg.batch_limit)
            .await?;

        let mut report = SweepReport {
            scanned: entities.len(),
            ..SweepReport::default()
        };
        for entity in entities {
            let result = self.refresh_entity(entity.id, now).await;
            report.absorb(entity.id, result);
        }

        info!(
            scanned = report.scanned,
            refreshed = report.refreshed,
            skipped_live = report.skipped_live,
            failed = report.failed.len(),
            "sweep pass complete"
        );
        Ok(report)
    }

    /// Refresh explicit ids regardless of partition or age.
    pub async fn backfill(&self, ids: &[EntityId], now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport {
            scanned: ids.len(),
            ..SweepReport::default()
        };
        for &id in ids {
            let result = self.refresh_entity(id, now).await;
            report.absorb(id, result);
        }
        info!(
            requested = ids.len(),
            refreshed = report.refreshed,
            unknown = report.unknown,
            failed = report.failed.len(),
            "backfill complete"
        );
        report
    }

    /// Sweep every `interval_secs` until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let interval = std::time::Duration::from_secs(self.cfg.interval_secs.max(1));
        info!(
            role = %self.role(),
            interval_secs = self.cfg.interval_secs,
            lookback_hours = self.cfg.lookback_hours,
            "Starting reconciliation sweep"
        );

        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(Utc::now()).await {
                        warn!(error = %e, "sweep pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Reconciliation sweep stopped");
        Ok(())
    }
}
