use crate::engine::race_guard::WriterRole;
use chrono::Duration;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Upper bound for every `*_secs` interval
const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;
/// Upper bound for every `*_mins` window; `*_hours` values share it
const MAX_WINDOW_MINS: i64 = 30 * 24 * 60;

/// Main configuration structure
///
/// Constructed once at startup and passed down explicitly; nothing reads
/// the environment after this point.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Writer role of this process (default: live)
    #[serde(default)]
    pub role: WriterRole,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Health server port (default: disabled)
    #[serde(default)]
    pub health_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Base URL of the sports API
    pub base_url: String,
    /// API key sent as `x-apisports-key`
    pub api_key: String,
    /// Per-request timeout in seconds (default: 12)
    pub timeout_secs: u64,
    /// Retries after the first attempt (default: 2)
    pub max_retries: u32,
    /// First retry delay in milliseconds (default: 400)
    pub base_backoff_ms: u64,
    /// Retry delay ceiling in milliseconds (default: 10s)
    pub max_backoff_ms: u64,
    /// Requests per minute across all calls, 0 disables pacing (default: 0)
    pub rate_limit_per_min: u32,
    /// Token bucket capacity (default: 5x the per-minute rate)
    pub rate_limit_burst: Option<u32>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://v1.hockey.api-sports.io".to_string(),
            api_key: String::new(),
            timeout_secs: 12,
            max_retries: 2,
            base_backoff_ms: 400,
            max_backoff_ms: 10_000,
            rate_limit_per_min: 0,
            rate_limit_burst: None,
        }
    }
}

impl ProviderConfig {
    pub fn effective_burst(&self) -> u32 {
        self.rate_limit_burst
            .unwrap_or_else(|| self.rate_limit_per_min.saturating_mul(5))
            .max(1)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/fixture_sync".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Partitions (leagues) this poller is responsible for
    pub partitions: Vec<i64>,
    /// Partitions polled at the super-fast interval
    pub super_fast_partitions: Vec<i64>,
    /// Partitions polled at the fast interval
    pub fast_partitions: Vec<i64>,
    /// (default: 5s)
    pub super_fast_interval_secs: u64,
    /// (default: 10s)
    pub fast_interval_secs: u64,
    /// Interval for every other partition (default: 20s)
    pub slow_interval_secs: u64,
    /// Pre-start lead time (default: 60m)
    pub pre_window_mins: i64,
    /// Delay between finish and the post-match fetch (default: 30m)
    pub post_window_mins: i64,
    /// How far back a started entity stays in the active window (default: 240m)
    pub live_max_age_mins: i64,
    /// How far ahead of its start an entity joins the active window (default: 2m)
    pub future_grace_mins: i64,
    /// Maximum candidates per tick (default: 120)
    pub batch_limit: i64,
    /// Entities processed concurrently within a tick (default: 8)
    pub worker_concurrency: usize,
    /// Sleep between ticks while there is work (default: 1000ms)
    pub tick_interval_ms: u64,
    /// Sleep when a tick found no candidates (default: 180s)
    pub idle_interval_secs: u64,
    /// Delay before retrying an entity whose provider call failed (default: 5s)
    pub failure_backoff_secs: u64,
    /// Attempts for each store write before giving up on the tick (default: 3)
    pub store_retry_attempts: u32,
    pub stuck_recovery: StuckRecoveryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            partitions: Vec::new(),
            super_fast_partitions: Vec::new(),
            fast_partitions: Vec::new(),
            super_fast_interval_secs: 5,
            fast_interval_secs: 10,
            slow_interval_secs: 20,
            pre_window_mins: 60,
            post_window_mins: 30,
            live_max_age_mins: 240,
            future_grace_mins: 2,
            batch_limit: 120,
            worker_concurrency: 8,
            tick_interval_ms: 1000,
            idle_interval_secs: 180,
            failure_backoff_secs: 5,
            store_retry_attempts: 3,
            stuck_recovery: StuckRecoveryConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn pre_window(&self) -> Duration {
        Duration::minutes(self.pre_window_mins)
    }

    pub fn post_window(&self) -> Duration {
        Duration::minutes(self.post_window_mins)
    }

    pub fn live_max_age(&self) -> Duration {
        Duration::minutes(self.live_max_age_mins)
    }

    pub fn future_grace(&self) -> Duration {
        Duration::minutes(self.future_grace_mins)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::seconds(self.failure_backoff_secs as i64)
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms)
    }

    pub fn idle_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_interval_secs)
    }
}

/// Forces a stuck NOT_STARTED entity to LIVE once occurrences show up
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StuckRecoveryConfig {
    /// (default: true)
    pub enabled: bool,
    /// Time past scheduled start before probing for occurrences (default: 10m)
    pub grace_mins: i64,
}

impl Default for StuckRecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            grace_mins: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Provider codes meaning the match is over
    pub finished_codes: Vec<String>,
    /// Provider codes meaning the match has not begun
    pub not_started_codes: Vec<String>,
    /// Interruption codes that count as finished once stale
    pub stalled_codes: Vec<String>,
    /// Age after scheduled start at which not-started is presumed finished (default: 6h)
    pub stale_after_hours: i64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        let codes = |list: &[&str]| list.iter().map(|c| c.to_string()).collect();
        Self {
            finished_codes: codes(&[
                "FT", "AET", "AOT", "AP", "PEN", "FIN", "END", "ENDED", "AWD", "WO", "ABD",
                "AW", "CANC", "POST", "PST", "FINISHED",
            ]),
            not_started_codes: codes(&["NS", "TBD", "SCHEDULED"]),
            stalled_codes: codes(&["SUSP", "INT", "DELAYED"]),
            stale_after_hours: 6,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Kinds the provider may retract; deleted when missing from a snapshot
    pub volatile_kinds: Vec<String>,
    /// Let an empty snapshot delete every volatile record (default: false)
    pub purge_on_empty_snapshot: bool,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            volatile_kinds: vec!["goal".to_string(), "penalty".to_string()],
            purge_on_empty_snapshot: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// How far back the secondary sweep looks (default: 36h)
    pub lookback_hours: i64,
    /// Maximum entities per sweep pass (default: 200)
    pub batch_limit: i64,
    /// Pause between passes in loop mode (default: 900s)
    pub interval_secs: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 36,
            batch_limit: 200,
            interval_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
    /// Directory for daily-rolling log files
    pub dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("FIXTURE_SYNC_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (FIXTURE_SYNC__SCHEDULER__PARTITIONS=57,58)
            .add_source(
                Environment::with_prefix("FIXTURE_SYNC")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("scheduler.partitions")
                    .with_list_parse_key("scheduler.super_fast_partitions")
                    .with_list_parse_key("scheduler.fast_partitions")
                    .with_list_parse_key("classifier.finished_codes")
                    .with_list_parse_key("classifier.not_started_codes")
                    .with_list_parse_key("classifier.stalled_codes")
                    .with_list_parse_key("reconciler.volatile_kinds")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        let s = &self.scheduler;

        if s.partitions.is_empty() {
            errors.push("scheduler.partitions must list at least one partition".to_string());
        }
        if s.worker_concurrency == 0 {
            errors.push("scheduler.worker_concurrency must be positive".to_string());
        }
        if s.batch_limit <= 0 {
            errors.push("scheduler.batch_limit must be positive".to_string());
        }
        for (name, secs) in [
            ("scheduler.super_fast_interval_secs", s.super_fast_interval_secs),
            ("scheduler.fast_interval_secs", s.fast_interval_secs),
            ("scheduler.slow_interval_secs", s.slow_interval_secs),
            ("scheduler.failure_backoff_secs", s.failure_backoff_secs),
            ("scheduler.idle_interval_secs", s.idle_interval_secs),
            ("sweep.interval_secs", self.sweep.interval_secs),
        ] {
            if secs == 0 || secs > MAX_INTERVAL_SECS {
                errors.push(format!("{name} must be in 1..={MAX_INTERVAL_SECS}"));
            }
        }
        for (name, mins, min) in [
            ("scheduler.pre_window_mins", s.pre_window_mins, 0),
            ("scheduler.post_window_mins", s.post_window_mins, 0),
            ("scheduler.future_grace_mins", s.future_grace_mins, 0),
            ("scheduler.live_max_age_mins", s.live_max_age_mins, 1),
            ("scheduler.stuck_recovery.grace_mins", s.stuck_recovery.grace_mins, 1),
        ] {
            if mins < min || mins > MAX_WINDOW_MINS {
                errors.push(format!("{name} must be in {min}..={MAX_WINDOW_MINS}"));
            }
        }
        for (name, hours) in [
            ("classifier.stale_after_hours", self.classifier.stale_after_hours),
            ("sweep.lookback_hours", self.sweep.lookback_hours),
        ] {
            if hours <= 0 || hours > MAX_WINDOW_MINS / 60 {
                errors.push(format!("{name} must be in 1..={}", MAX_WINDOW_MINS / 60));
            }
        }
        if self.sweep.batch_limit <= 0 {
            errors.push("sweep.batch_limit must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Tier partitions that are not in the tracked set; harmless but usually a typo.
    pub fn untracked_tier_partitions(&self) -> Vec<i64> {
        let s = &self.scheduler;
        s.super_fast_partitions
            .iter()
            .chain(s.fast_partitions.iter())
            .filter(|p| !s.partitions.contains(p))
            .copied()
            .collect()
    }
}
