pub mod adapters;
pub mod cli;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod retry;
pub mod schema;
pub mod services;
pub mod store;

pub use config::AppConfig;
pub use domain::{CanonicalPhase, Entity, EntityId, EventRecord, Occurrence, PollState};
pub use engine::{PollScheduler, SnapshotReconciler, TickReport, WriterRole};
pub use error::{Result, SyncError};
pub use store::SyncStore;
