//! Role-tagged write contract between the live poller and secondary writers.
//!
//! Advisory only: a secondary writer checks the stored phase immediately
//! before mutating sub-records and backs off while the entity is LIVE.

use crate::domain::{CanonicalPhase, Entity};
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterRole {
    /// The live poller; owns sub-records while an entity is in play
    #[default]
    Live,
    /// Explicit id backfill
    Backfill,
    /// Periodic reconciliation sweep
    Sweep,
}

impl WriterRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriterRole::Live => "live",
            WriterRole::Backfill => "backfill",
            WriterRole::Sweep => "sweep",
        }
    }

    pub fn is_secondary(&self) -> bool {
        !matches!(self, WriterRole::Live)
    }
}

impl std::fmt::Display for WriterRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WriterRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "live" => Ok(WriterRole::Live),
            "backfill" => Ok(WriterRole::Backfill),
            "sweep" => Ok(WriterRole::Sweep),
            other => Err(format!("unknown writer role: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Write,
    /// Entity is live and owned by the live poller
    Skip,
}

#[derive(Debug, Clone, Copy)]
pub struct RaceGuard {
    role: WriterRole,
}

impl RaceGuard {
    pub fn new(role: WriterRole) -> Self {
        Self { role }
    }

    pub fn role(&self) -> WriterRole {
        self.role
    }

    /// Decide for the entity as currently stored. Unknown entities are writable.
    pub fn check(&self, stored: Option<&Entity>) -> GuardDecision {
        match stored {
            Some(entity) if self.role.is_secondary() && entity.phase == CanonicalPhase::Live => {
                GuardDecision::Skip
            }
            _ => GuardDecision::Write,
        }
    }
}
