//! Ingestion stages and the orchestrator that composes them.

mod dedup;
mod executor;
mod existing;
mod insert;
mod metrics;
mod orchestrator;
mod partition;
mod validation;

#[cfg(test)]
mod orchestrator_integration_tests;

pub use dedup::{deduplicate, DeduplicationResult};
pub use executor::ParallelChunkExecutor;
pub use existing::{filter_existing, filter_existing_with_retry, ExistingFilterResult};
pub use insert::insert;
pub use metrics::{BatchMetrics, MetricsSnapshot};
pub use orchestrator::BatchOrchestrator;
pub use partition::partition;
pub use validation::{ChunkValidator, Validator};
