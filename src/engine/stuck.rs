use crate::config::StuckRecoveryConfig;
use crate::domain::{CanonicalPhase, Entity, PollState};
use chrono::{DateTime, Duration, Utc};

/// Provider feeds sometimes keep reporting "not started" long after play
/// began. When occurrences exist past the grace period the entity is
/// treated as live anyway.
///
/// Switchable per deployment through `scheduler.stuck_recovery.enabled`.
#[derive(Debug, Clone, Copy)]
pub struct StuckRecoveryPolicy {
    enabled: bool,
    grace: Duration,
}

impl StuckRecoveryPolicy {
    pub fn new(config: &StuckRecoveryConfig) -> Self {
        Self {
            enabled: config.enabled,
            grace: Duration::minutes(config.grace_mins),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            grace: Duration::zero(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Probe only after the start action ran, once the grace period passed,
    /// and at most once per live polling slot.
    pub fn should_probe(&self, entity: &Entity, poll: &PollState, now: DateTime<Utc>) -> bool {
        self.enabled
            && entity.phase == CanonicalPhase::NotStarted
            && poll.start_called_at.is_some()
            && now >= entity.scheduled_start + self.grace
            && poll.live_poll_due(now)
    }
}
