pub mod health;
pub mod metrics;
pub mod sweep;

pub use health::{ComponentHealth, HealthResponse, HealthServer, HealthState, HealthStatus};
pub use metrics::Metrics;
pub use sweep::{ReconcileSweep, RefreshOutcome, SweepReport};
