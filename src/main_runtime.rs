use fixture_sync::adapters::{ApiSportsClient, PostgresStore, ProviderClient};
use fixture_sync::config::{AppConfig, LoggingConfig};
use fixture_sync::error::{Result, SyncError};
use fixture_sync::schema::SchemaDescription;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

pub fn init_logging(cfg: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},fixture_sync=debug,sqlx=warn", cfg.level))
    });

    // `tracing_appender::rolling::daily` panics if it cannot create the
    // initial file, so check the directory is writable first.
    let file_layer = cfg.dir.as_deref().and_then(|log_dir| {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Could not create log directory {} ({}), file logging disabled",
                log_dir, e
            );
            return None;
        }
        let test_path = std::path::Path::new(log_dir).join(".fixture_sync_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);
                let file_appender = tracing_appender::rolling::daily(log_dir, "fixture-sync.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // Lives as long as the process
                Box::leak(Box::new(guard));
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    });

    let (plain, json) = if cfg.json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_target(true)))
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .with(file_layer)
        .init();
}

pub fn init_logging_simple() {
    // Minimal logging for one-off commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

/// Load and validate configuration, surfacing every problem at once.
pub fn load_config(dir: &str) -> Result<AppConfig> {
    let config = AppConfig::load_from(dir)?;
    config.validate().map_err(SyncError::InvalidConfig)?;
    Ok(config)
}

/// Warnings that do not stop startup
pub fn warn_config(config: &AppConfig) {
    if config.provider.api_key.trim().is_empty() {
        warn!("provider.api_key is empty, upstream requests will likely be rejected");
    }
    let untracked = config.untracked_tier_partitions();
    if !untracked.is_empty() {
        warn!(?untracked, "tier partitions not listed in scheduler.partitions are ignored");
    }
}

/// Connect, read the live schema and refuse to start without required columns.
pub async fn open_store(config: &AppConfig) -> Result<Arc<PostgresStore>> {
    let pool =
        PostgresStore::connect(&config.database.url, config.database.max_connections).await?;
    let schema = SchemaDescription::load(&pool).await?;
    schema.ensure_required()?;
    Ok(Arc::new(PostgresStore::new(pool, &schema)))
}

pub fn provider(config: &AppConfig) -> Result<Arc<dyn ProviderClient>> {
    Ok(Arc::new(ApiSportsClient::new(&config.provider)?))
}

pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
