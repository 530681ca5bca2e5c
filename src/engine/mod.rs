pub mod classifier;
pub mod race_guard;
pub mod reconciler;
pub mod scheduler;
pub mod stuck;
pub mod tier;
pub mod upserter;
pub mod window;

pub use classifier::StatusClassifier;
pub use race_guard::{GuardDecision, RaceGuard, WriterRole};
pub use reconciler::{ReconcileOutcome, SnapshotReconciler};
pub use scheduler::{Action, PollScheduler, TickReport};
pub use stuck::StuckRecoveryPolicy;
pub use tier::TierPolicy;
pub use upserter::EntityUpserter;
pub use window::CandidateWindow;
