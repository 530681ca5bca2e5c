use crate::engine::reconciler::ReconcileOutcome;
use crate::engine::scheduler::{Action, TickReport};
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics collector for observability
#[derive(Debug, Default)]
pub struct Metrics {
    /// Ticks completed
    pub ticks: AtomicU64,
    /// Candidates seen across all ticks
    pub candidates: AtomicU64,
    /// Provider requests issued (retries not counted)
    pub provider_calls: AtomicU64,
    pub pre_actions: AtomicU64,
    pub start_actions: AtomicU64,
    pub live_polls: AtomicU64,
    pub finish_actions: AtomicU64,
    pub post_actions: AtomicU64,
    pub stuck_recoveries: AtomicU64,
    pub records_inserted: AtomicU64,
    pub records_updated: AtomicU64,
    pub records_deleted: AtomicU64,
    /// Writes refused by the race guard
    pub guard_skips: AtomicU64,
    pub provider_failures: AtomicU64,
    pub store_failures: AtomicU64,
    pub payload_failures: AtomicU64,
    pub other_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_provider_calls(&self) {
        self.provider_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stuck_recoveries(&self) {
        self.stuck_recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_action(&self, action: Action) {
        let counter = match action {
            Action::Pre => &self.pre_actions,
            Action::Start => &self.start_actions,
            Action::LivePoll => &self.live_polls,
            Action::Finish => &self.finish_actions,
            Action::Post => &self.post_actions,
            // counted separately in inc_stuck_recoveries
            Action::StuckRecovery => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Bucket a failure by [`crate::SyncError::kind`].
    pub fn inc_failure(&self, kind: &str) {
        let counter = match kind {
            "provider_transient" | "provider_rejected" | "rate_limited" => &self.provider_failures,
            "store" => &self.store_failures,
            "malformed_payload" => &self.payload_failures,
            _ => &self.other_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconcile(&self, outcome: &ReconcileOutcome) {
        self.records_inserted
            .fetch_add(outcome.inserted as u64, Ordering::Relaxed);
        self.records_updated
            .fetch_add(outcome.updated as u64, Ordering::Relaxed);
        self.records_deleted
            .fetch_add(outcome.deleted, Ordering::Relaxed);
        if outcome.skipped {
            self.guard_skips.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_tick(&self, report: &TickReport) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        self.candidates
            .fetch_add(report.candidates as u64, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    pub fn prometheus(&self) -> String {
        let counters: [(&str, &str, &AtomicU64); 17] = [
            ("ticks_total", "Scheduler ticks completed", &self.ticks),
            ("candidates_total", "Candidates evaluated", &self.candidates),
            ("provider_calls_total", "Provider requests issued", &self.provider_calls),
            ("pre_actions_total", "Pre-start fetches", &self.pre_actions),
            ("start_actions_total", "Start fetches", &self.start_actions),
            ("live_polls_total", "Periodic live polls", &self.live_polls),
            ("finish_actions_total", "Finish fetches", &self.finish_actions),
            ("post_actions_total", "Post-match fetches", &self.post_actions),
            ("stuck_recoveries_total", "Entities forced from not started to live", &self.stuck_recoveries),
            ("records_inserted_total", "Event records inserted", &self.records_inserted),
            ("records_updated_total", "Event records updated in place", &self.records_updated),
            ("records_deleted_total", "Retracted event records deleted", &self.records_deleted),
            ("guard_skips_total", "Writes skipped because the entity was live", &self.guard_skips),
            ("provider_failures_total", "Entity ticks failed on the provider", &self.provider_failures),
            ("store_failures_total", "Entity ticks failed on the store", &self.store_failures),
            ("payload_failures_total", "Entity ticks failed on malformed payloads", &self.payload_failures),
            ("other_failures_total", "Entity ticks failed for other reasons", &self.other_failures),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP fixture_sync_{name} {help}\n# TYPE fixture_sync_{name} counter\nfixture_sync_{name} {}\n\n",
                value.load(Ordering::Relaxed)
            ));
        }
        out
    }
}
