use crate::config::SchedulerConfig;
use crate::domain::PartitionId;
use chrono::Duration;
use std::collections::HashSet;

/// Live polling cadence per partition: super-fast, fast, or the slow default.
#[derive(Debug, Clone)]
pub struct TierPolicy {
    super_fast: HashSet<PartitionId>,
    fast: HashSet<PartitionId>,
    super_fast_interval: Duration,
    fast_interval: Duration,
    slow_interval: Duration,
}

impl TierPolicy {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            super_fast: config.super_fast_partitions.iter().copied().collect(),
            fast: config.fast_partitions.iter().copied().collect(),
            super_fast_interval: Duration::seconds(config.super_fast_interval_secs as i64),
            fast_interval: Duration::seconds(config.fast_interval_secs as i64),
            slow_interval: Duration::seconds(config.slow_interval_secs as i64),
        }
    }

    pub fn interval_for(&self, partition: PartitionId) -> Duration {
        if self.super_fast.contains(&partition) {
            self.super_fast_interval
        } else if self.fast.contains(&partition) {
            self.fast_interval
        } else {
            self.slow_interval
        }
    }
}
