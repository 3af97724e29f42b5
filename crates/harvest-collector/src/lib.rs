//! Collection runs: fan-out over source adapters, deduplication against the
//! store, and one-shot or periodic scheduling.

pub mod dedup;
pub mod orchestrator;
pub mod scheduler;
pub mod store;

pub use dedup::{DedupOutcome, Deduplicator};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use scheduler::{ScheduleReport, Scheduler};
pub use store::{CollectionStore, DbStore};

#[cfg(test)]
pub(crate) mod test_support;
