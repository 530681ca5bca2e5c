//! Bounds of the per-tick working set.

use crate::config::SchedulerConfig;
use crate::domain::{CanonicalPhase, Entity, PartitionId, PollState};
use chrono::{DateTime, Utc};

/// Candidate selection bounds evaluated at one instant.
///
/// An entity of a tracked partition is a candidate when any of these hold:
/// - upcoming: scheduled start in `[now, now + pre_window]`
/// - active: start in `[now - live_max_age, now + future_grace]` and not finished
/// - orphaned: start was called but the entity never finished, at any age
/// - awaiting post: finished but the post-match fetch has not happened
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateWindow {
    pub partitions: Vec<PartitionId>,
    pub now: DateTime<Utc>,
    pub upcoming_until: DateTime<Utc>,
    pub active_from: DateTime<Utc>,
    pub active_until: DateTime<Utc>,
    pub limit: i64,
}

impl CandidateWindow {
    pub fn at(now: DateTime<Utc>, config: &SchedulerConfig) -> Self {
        Self {
            partitions: config.partitions.clone(),
            now,
            upcoming_until: now + config.pre_window(),
            active_from: now - config.live_max_age(),
            active_until: now + config.future_grace(),
            limit: config.batch_limit,
        }
    }

    pub fn admits(&self, entity: &Entity, poll: Option<&PollState>) -> bool {
        if !self.partitions.contains(&entity.partition_id) {
            return false;
        }

        let start = entity.scheduled_start;
        let upcoming = start >= self.now && start <= self.upcoming_until;
        let active = start >= self.active_from
            && start <= self.active_until
            && entity.phase != CanonicalPhase::Finished;
        let orphaned = poll.map_or(false, |p| {
            p.start_called_at.is_some() && p.finished_at.is_none()
        });
        let awaiting_post = poll.map_or(false, |p| {
            p.finished_at.is_some() && p.post_called_at.is_none()
        });

        upcoming || active || orphaned || awaiting_post
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 1, 20, 0, 0).unwrap()
    }

    fn window() -> CandidateWindow {
        let config = SchedulerConfig {
            partitions: vec![57],
            ..SchedulerConfig::default()
        };
        CandidateWindow::at(now(), &config)
    }

    fn entity(start_offset_mins: i64, phase: CanonicalPhase) -> Entity {
        let mut e = Entity::scheduled(1, 57, now() + Duration::minutes(start_offset_mins), now());
        e.phase = phase;
        e
    }

    #[test]
    fn test_upcoming_and_active_bounds() {
        let w = window();
        assert!(w.admits(&entity(60, CanonicalPhase::NotStarted), None));
        assert!(!w.admits(&entity(61, CanonicalPhase::NotStarted), None));
        assert!(w.admits(&entity(-240, CanonicalPhase::Live), None));
        assert!(!w.admits(&entity(-241, CanonicalPhase::Live), None));
        assert!(!w.admits(&entity(-30, CanonicalPhase::Finished), None));
    }

    #[test]
    fn test_orphan_admitted_regardless_of_age() {
        let w = window();
        let e = entity(-2000, CanonicalPhase::Live);
        let mut poll = PollState::new(1, now());
        assert!(!w.admits(&e, Some(&poll)));
        poll.start_called_at = Some(now() - Duration::minutes(2000));
        assert!(w.admits(&e, Some(&poll)));
    }

    #[test]
    fn test_awaiting_post_admitted() {
        let w = window();
        let e = entity(-600, CanonicalPhase::Finished);
        let mut poll = PollState::new(1, now());
        poll.finished_at = Some(now() - Duration::minutes(10));
        assert!(w.admits(&e, Some(&poll)));
        poll.post_called_at = Some(now());
        assert!(!w.admits(&e, Some(&poll)));
    }

    #[test]
    fn test_untracked_partition_rejected() {
        let w = window();
        let mut e = entity(10, CanonicalPhase::NotStarted);
        e.partition_id = 99;
        assert!(!w.admits(&e, None));
    }
}
