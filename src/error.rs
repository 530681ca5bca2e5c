use thiserror::Error;

/// Main error type for the sync engine
#[derive(Error, Debug)]
pub enum SyncError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Provider errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Non-success, non-retryable response. Treated as "no update this tick".
    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    /// Payload did not carry a required field or had the wrong shape.
    #[error("Malformed payload: {0}")]
    Decode(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Domain errors
    #[error("Entity not found: {0}")]
    EntityNotFound(i64),

    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::Timeout(_)
            | SyncError::RateLimited(_)
            | SyncError::ProviderUnavailable(_) => true,
            SyncError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SyncError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Config(_) | SyncError::InvalidConfig(_) => "config",
            SyncError::Database(_) | SyncError::Migration(_) => "store",
            SyncError::Http(_) | SyncError::Timeout(_) | SyncError::ProviderUnavailable(_) => {
                "provider_transient"
            }
            SyncError::RateLimited(_) => "rate_limited",
            SyncError::ProviderRejected(_) => "provider_rejected",
            SyncError::Decode(_) | SyncError::Json(_) => "malformed_payload",
            SyncError::EntityNotFound(_) => "not_found",
            SyncError::Validation(_) => "validation",
            SyncError::Io(_) | SyncError::Internal(_) | SyncError::Other(_) => "internal",
        }
    }
}

/// Result type alias for SyncError
pub type Result<T> = std::result::Result<T, SyncError>;
