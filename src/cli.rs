use clap::{Parser, Subcommand};

use crate::domain::{EntityId, OneShot};

#[derive(Parser)]
#[command(name = "fixture-sync")]
#[command(version)]
#[command(about = "Polls live fixtures from an upstream provider and reconciles them into Postgres", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config directory (default.toml plus an optional per-environment file)
    #[arg(short, long, default_value = "config", env = "FIXTURE_SYNC_CONFIG_DIR")]
    pub config: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the live poller and the health server
    Run,
    /// Reconcile recently started entities under the sweep role
    Sweep {
        /// Run a single pass and exit
        #[arg(long)]
        once: bool,
    },
    /// Refresh explicit entity ids under the backfill role
    Backfill {
        /// Entity ids, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        ids: Vec<EntityId>,
    },
    /// Apply database migrations
    Migrate,
    /// Clear one-shot poll marks so the action fires again
    ResetPollState {
        /// Entity id
        #[arg(long)]
        entity: EntityId,
        /// Marks to clear: pre, start, end (or finish), post
        #[arg(long, value_delimiter = ',', required = true)]
        field: Vec<OneShot>,
    },
}
