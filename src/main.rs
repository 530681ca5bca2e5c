use clap::Parser;
use fixture_sync::adapters::PostgresStore;
use fixture_sync::cli::{Cli, Commands};
use fixture_sync::config::AppConfig;
use fixture_sync::engine::{PollScheduler, WriterRole};
use fixture_sync::error::{Result, SyncError};
use fixture_sync::services::{HealthServer, HealthState, Metrics, ReconcileSweep};
use fixture_sync::store::PollStateStore;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info, warn};

mod main_runtime;

use main_runtime::{
    init_logging, init_logging_simple, load_config, open_store, provider, shutdown_signal,
    warn_config,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            init_logging_simple();
            error!("{e}");
            return Err(e);
        }
    };

    match cli.command {
        Commands::Run => {
            init_logging(&config.logging);
            warn_config(&config);
            run_live(config).await
        }
        Commands::Sweep { once } => {
            init_logging(&config.logging);
            warn_config(&config);
            run_sweep(config, once).await
        }
        Commands::Backfill { ids } => {
            init_logging(&config.logging);
            warn_config(&config);
            let store = open_store(&config).await?;
            let sweep = ReconcileSweep::new(store, provider(&config)?, &config, WriterRole::Backfill)?;
            let report = sweep.backfill(&ids, chrono::Utc::now()).await;
            if report.failed.is_empty() {
                Ok(())
            } else {
                Err(SyncError::Internal(format!(
                    "backfill failed for {:?}",
                    report.failed
                )))
            }
        }
        Commands::Migrate => {
            init_logging_simple();
            let pool =
                PostgresStore::connect(&config.database.url, config.database.max_connections)
                    .await?;
            PostgresStore::migrate(&pool).await?;
            println!("Migrations applied");
            Ok(())
        }
        Commands::ResetPollState { entity, field } => {
            init_logging_simple();
            let store = open_store(&config).await?;
            match store.clear_marks(entity, &field, chrono::Utc::now()).await? {
                Some(state) => {
                    info!(entity, ?field, "poll marks cleared");
                    println!("{}", serde_json::to_string_pretty(&state)?);
                    Ok(())
                }
                None => Err(SyncError::EntityNotFound(entity)),
            }
        }
    }
}

/// Flip the shutdown channel on SIGINT or SIGTERM.
fn spawn_shutdown() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = tx.send(true);
    });
    rx
}

async fn run_live(config: AppConfig) -> Result<()> {
    if config.role.is_secondary() {
        return Err(SyncError::InvalidConfig(vec![format!(
            "`run` drives the live poller but role is {}",
            config.role
        )]));
    }

    let store = open_store(&config).await?;
    let metrics = Arc::new(Metrics::new());
    // Three missed idle intervals before the scheduler counts as stalled
    let staleness = config.scheduler.idle_interval_secs.saturating_mul(3).max(60);
    let health = Arc::new(HealthState::new(WriterRole::Live, staleness).with_metrics(Arc::clone(&metrics)));
    health.record_db_check(store.ping().await.is_ok()).await;

    let shutdown = spawn_shutdown();
    spawn_db_monitor(Arc::clone(&store), Arc::clone(&health), shutdown.clone());

    if let Some(port) = config.health_port {
        let server = HealthServer::new(Arc::clone(&health), port);
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Health server failed: {}", e);
            }
        });
    }

    let scheduler = PollScheduler::new(store, provider(&config)?, &config)
        .with_metrics(metrics)
        .with_health(health);
    scheduler.run(shutdown).await
}

async fn run_sweep(config: AppConfig, once: bool) -> Result<()> {
    let store = open_store(&config).await?;
    let sweep = ReconcileSweep::new(store, provider(&config)?, &config, WriterRole::Sweep)?;

    if once {
        let report = sweep.run_once(chrono::Utc::now()).await?;
        if !report.failed.is_empty() {
            warn!(failed = ?report.failed, "some entities could not be refreshed");
        }
        return Ok(());
    }
    sweep.run(spawn_shutdown()).await
}

fn spawn_db_monitor(
    store: Arc<PostgresStore>,
    health: Arc<HealthState>,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let ok = store.ping().await.is_ok();
                    if !ok {
                        warn!("database ping failed");
                    }
                    health.record_db_check(ok).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    });
}
