use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Provider-independent lifecycle phase of an entity.
///
/// Variants are ordered by progression, so the stored phase of an entity is
/// always `max(stored, observed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanonicalPhase {
    NotStarted,
    Live,
    Finished,
}

impl CanonicalPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalPhase::NotStarted => "NOT_STARTED",
            CanonicalPhase::Live => "LIVE",
            CanonicalPhase::Finished => "FINISHED",
        }
    }

    /// Numeric rank persisted next to the phase so SQL can refuse regressions.
    pub fn rank(&self) -> i16 {
        match self {
            CanonicalPhase::NotStarted => 0,
            CanonicalPhase::Live => 1,
            CanonicalPhase::Finished => 2,
        }
    }

    /// Combine a stored phase with a freshly observed one without regressing.
    pub fn advance(self, observed: CanonicalPhase) -> CanonicalPhase {
        self.max(observed)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, CanonicalPhase::Finished)
    }
}

impl std::fmt::Display for CanonicalPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CanonicalPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NOT_STARTED" => Ok(CanonicalPhase::NotStarted),
            "LIVE" => Ok(CanonicalPhase::Live),
            "FINISHED" => Ok(CanonicalPhase::Finished),
            other => Err(format!("unknown canonical phase: {other}")),
        }
    }
}
