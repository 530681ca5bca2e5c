//! Health check HTTP server
//!
//! Liveness and readiness probes for process supervision plus a Prometheus
//! metrics endpoint.

use crate::engine::race_guard::WriterRole;
use crate::engine::scheduler::TickReport;
use crate::services::Metrics;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Health status for a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Component health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
}

/// Overall system health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub role: String,
    pub components: Vec<ComponentHealth>,
}

/// Shared state for health server
pub struct HealthState {
    /// When the server started
    pub started_at: DateTime<Utc>,
    pub role: WriterRole,
    /// Is database connected
    pub db_connected: AtomicBool,
    /// Last database check timestamp
    pub last_db_check: RwLock<Option<DateTime<Utc>>>,
    /// Last completed scheduler tick
    pub last_tick: RwLock<Option<TickReport>>,
    /// Metrics reference
    pub metrics: Option<Arc<Metrics>>,
    /// Seconds without a tick before the scheduler counts as stalled
    pub tick_staleness_threshold: u64,
}

impl HealthState {
    pub fn new(role: WriterRole, tick_staleness_threshold: u64) -> Self {
        Self {
            started_at: Utc::now(),
            role,
            db_connected: AtomicBool::new(false),
            last_db_check: RwLock::new(None),
            last_tick: RwLock::new(None),
            metrics: None,
            tick_staleness_threshold,
        }
    }

    pub fn with_metrics(mut self, m: Arc<Metrics>) -> Self {
        self.metrics = Some(m);
        self
    }

    /// Record database check
    pub async fn record_db_check(&self, success: bool) {
        *self.last_db_check.write().await = Some(Utc::now());
        self.db_connected.store(success, Ordering::SeqCst);
    }

    pub async fn record_tick(&self, report: &TickReport) {
        *self.last_tick.write().await = Some(report.clone());
    }

    async fn scheduler_health(&self, now: DateTime<Utc>) -> ComponentHealth {
        let last = self.last_tick.read().await;
        let last_at = last.as_ref().and_then(|r| r.at);
        let uptime = (now - self.started_at).num_seconds().max(0) as u64;

        let (status, message) = match last.as_ref() {
            None if uptime <= self.tick_staleness_threshold => {
                (HealthStatus::Degraded, Some("No tick yet".to_string()))
            }
            None => (HealthStatus::Unhealthy, Some("Scheduler never ticked".to_string())),
            Some(report) => {
                let age = last_at
                    .map(|at| (now - at).num_seconds().max(0) as u64)
                    .unwrap_or(u64::MAX);
                if age > self.tick_staleness_threshold {
                    (
                        HealthStatus::Unhealthy,
                        Some(format!("Last tick {}s ago", age)),
                    )
                } else if report.candidates > 0 && report.processed == 0 && report.failed > 0 {
                    (
                        HealthStatus::Degraded,
                        Some(format!("All {} entities failed last tick", report.failed)),
                    )
                } else {
                    (HealthStatus::Healthy, None)
                }
            }
        };

        ComponentHealth {
            name: "scheduler".to_string(),
            status,
            message,
            last_check: last_at,
        }
    }

    /// Get overall health status
    pub async fn get_health(&self) -> HealthResponse {
        let now = Utc::now();
        let mut components = Vec::new();

        let db_connected = self.db_connected.load(Ordering::SeqCst);
        components.push(ComponentHealth {
            name: "database".to_string(),
            status: if db_connected {
                HealthStatus::Healthy
            } else {
                HealthStatus::Unhealthy
            },
            message: if db_connected {
                None
            } else {
                Some("Disconnected".to_string())
            },
            last_check: *self.last_db_check.read().await,
        });

        if self.role == WriterRole::Live {
            components.push(self.scheduler_health(now).await);
        }

        let status = components
            .iter()
            .fold(HealthStatus::Healthy, |acc, c| acc.worst(c.status));

        HealthResponse {
            status,
            timestamp: now,
            uptime_seconds: (now - self.started_at).num_seconds().max(0) as u64,
            role: self.role.to_string(),
            components,
        }
    }
}

/// Routes served by the health server
pub fn router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Health check server
pub struct HealthServer {
    state: Arc<HealthState>,
    port: u16,
}

impl HealthServer {
    pub fn new(state: Arc<HealthState>, port: u16) -> Self {
        Self { state, port }
    }

    /// Start the health server
    pub async fn run(&self) -> crate::Result<()> {
        let app = router(Arc::clone(&self.state));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting health server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .await
            .map_err(|e| crate::SyncError::Internal(format!("Health server error: {}", e)))?;

        Ok(())
    }

    /// Get shared state for updating from other components
    pub fn state(&self) -> Arc<HealthState> {
        Arc::clone(&self.state)
    }
}

/// Full health check endpoint
async fn health_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    let status_code = match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

/// Liveness probe - is the process alive?
async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}

/// Readiness probe
async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    match health.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Prometheus metrics endpoint
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let health = state.get_health().await;
    let health_status = match health.status {
        HealthStatus::Healthy => 1,
        HealthStatus::Degraded => 0,
        HealthStatus::Unhealthy => -1,
    };
    let db_connected = u8::from(state.db_connected.load(Ordering::SeqCst));

    let mut body = format!(
        r#"# HELP fixture_sync_up Health status (1=healthy, 0=degraded, -1=unhealthy)
# TYPE fixture_sync_up gauge
fixture_sync_up {}

# HELP fixture_sync_uptime_seconds Uptime in seconds
# TYPE fixture_sync_uptime_seconds counter
fixture_sync_uptime_seconds {}

# HELP fixture_sync_database_connected Database connection status
# TYPE fixture_sync_database_connected gauge
fixture_sync_database_connected {}

"#,
        health_status, health.uptime_seconds, db_connected,
    );
    if let Some(m) = &state.metrics {
        body.push_str(&m.prometheus());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
}
