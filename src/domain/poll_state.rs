use super::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Per-entity lifecycle bookkeeping for the scheduler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollState {
    pub entity_id: EntityId,
    pub pre_called_at: Option<DateTime<Utc>>,
    pub start_called_at: Option<DateTime<Utc>>,
    pub end_called_at: Option<DateTime<Utc>>,
    pub post_called_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub next_live_poll_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// The four actions that fire at most once per lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OneShot {
    Pre,
    Start,
    End,
    Post,
}

impl OneShot {
    pub fn as_str(&self) -> &'static str {
        match self {
            OneShot::Pre => "pre",
            OneShot::Start => "start",
            OneShot::End => "end",
            OneShot::Post => "post",
        }
    }
}

impl std::fmt::Display for OneShot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OneShot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pre" => Ok(OneShot::Pre),
            "start" => Ok(OneShot::Start),
            "end" | "finish" => Ok(OneShot::End),
            "post" => Ok(OneShot::Post),
            other => Err(format!("unknown poll action: {other}")),
        }
    }
}

/// A single write against a poll state row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMark {
    Called(OneShot, DateTime<Utc>),
    NextLivePoll(DateTime<Utc>),
}

impl PollState {
    pub fn new(entity_id: EntityId, now: DateTime<Utc>) -> Self {
        Self {
            entity_id,
            pre_called_at: None,
            start_called_at: None,
            end_called_at: None,
            post_called_at: None,
            finished_at: None,
            next_live_poll_at: None,
            updated_at: now,
        }
    }

    pub fn called_at(&self, action: OneShot) -> Option<DateTime<Utc>> {
        match action {
            OneShot::Pre => self.pre_called_at,
            OneShot::Start => self.start_called_at,
            OneShot::End => self.end_called_at,
            OneShot::Post => self.post_called_at,
        }
    }

    /// Apply a mark. One-shot fields keep their first value; finishing also
    /// stamps `finished_at`.
    pub fn apply(&mut self, mark: PollMark, now: DateTime<Utc>) {
        match mark {
            PollMark::Called(action, at) => {
                let slot = match action {
                    OneShot::Pre => &mut self.pre_called_at,
                    OneShot::Start => &mut self.start_called_at,
                    OneShot::End => &mut self.end_called_at,
                    OneShot::Post => &mut self.post_called_at,
                };
                slot.get_or_insert(at);
                if action == OneShot::End {
                    self.finished_at.get_or_insert(at);
                }
            }
            PollMark::NextLivePoll(at) => self.next_live_poll_at = Some(at),
        }
        self.updated_at = now;
    }

    /// Explicit correction path; the only way a one-shot field goes back to null.
    pub fn clear(&mut self, action: OneShot, now: DateTime<Utc>) {
        match action {
            OneShot::Pre => self.pre_called_at = None,
            OneShot::Start => self.start_called_at = None,
            OneShot::End => {
                self.end_called_at = None;
                self.finished_at = None;
            }
            OneShot::Post => self.post_called_at = None,
        }
        self.updated_at = now;
    }

    pub fn live_poll_due(&self, now: DateTime<Utc>) -> bool {
        self.next_live_poll_at.map_or(true, |next| now >= next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 19, 0, 0).unwrap()
    }

    #[test]
    fn test_one_shot_keeps_first_value() {
        let mut state = PollState::new(7, t0());
        state.apply(PollMark::Called(OneShot::Pre, t0()), t0());
        state.apply(
            PollMark::Called(OneShot::Pre, t0() + Duration::minutes(5)),
            t0() + Duration::minutes(5),
        );
        assert_eq!(state.pre_called_at, Some(t0()));
    }

    #[test]
    fn test_end_stamps_finished_at() {
        let mut state = PollState::new(7, t0());
        state.apply(PollMark::Called(OneShot::End, t0()), t0());
        assert_eq!(state.end_called_at, Some(t0()));
        assert_eq!(state.finished_at, Some(t0()));

        state.clear(OneShot::End, t0());
        assert!(state.end_called_at.is_none());
        assert!(state.finished_at.is_none());
    }

    #[test]
    fn test_live_poll_due() {
        let mut state = PollState::new(7, t0());
        assert!(state.live_poll_due(t0()));
        state.apply(PollMark::NextLivePoll(t0() + Duration::seconds(10)), t0());
        assert!(!state.live_poll_due(t0() + Duration::seconds(9)));
        assert!(state.live_poll_due(t0() + Duration::seconds(10)));
    }
}
