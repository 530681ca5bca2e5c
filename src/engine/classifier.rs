//! Maps provider phase codes onto [`CanonicalPhase`].

use crate::config::ClassifierConfig;
use crate::domain::CanonicalPhase;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;

/// Pure classifier over configurable code sets. Codes compare trimmed and
/// upper-cased.
#[derive(Debug, Clone)]
pub struct StatusClassifier {
    finished: HashSet<String>,
    not_started: HashSet<String>,
    stalled: HashSet<String>,
    stale_after: Duration,
}

fn normalize_set(codes: &[String]) -> HashSet<String> {
    codes
        .iter()
        .map(|c| c.trim().to_ascii_uppercase())
        .filter(|c| !c.is_empty())
        .collect()
}

impl StatusClassifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        Self {
            finished: normalize_set(&config.finished_codes),
            not_started: normalize_set(&config.not_started_codes),
            stalled: normalize_set(&config.stalled_codes),
            stale_after: Duration::hours(config.stale_after_hours),
        }
    }

    pub fn classify(
        &self,
        code: &str,
        scheduled_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> CanonicalPhase {
        let code = code.trim().to_ascii_uppercase();
        if self.finished.contains(&code) {
            return CanonicalPhase::Finished;
        }

        let stale = now - scheduled_start > self.stale_after;
        if code.is_empty() || self.not_started.contains(&code) {
            // A match that never left "not started" hours after kickoff is over
            // as far as polling is concerned.
            return if stale {
                CanonicalPhase::Finished
            } else {
                CanonicalPhase::NotStarted
            };
        }
        if stale && self.stalled.contains(&code) {
            return CanonicalPhase::Finished;
        }

        CanonicalPhase::Live
    }

    pub fn is_finished(&self, code: &str, scheduled_start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.classify(code, scheduled_start, now).is_finished()
    }
}

impl Default for StatusClassifier {
    fn default() -> Self {
        Self::new(&ClassifierConfig::default())
    }
}
