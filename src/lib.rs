//! Bulk Product Ingestion
//!
//! Validates, deduplicates and persists large batches of product records,
//! producing a per-batch summary of what was inserted, skipped or rejected.
//!
//! # Architecture
//!
//! The pipeline consists of:
//!
//! - **Partition / Executor**: chunking and bounded-concurrency validation
//! - **Dedup / Existing / Insert**: ordered reduction and a single bulk write
//! - **Orchestrator**: the per-batch state machine and failure policy
//! - **I/O**: the store and classifier boundaries, plus an in-memory store
//!
//! # Usage
//!
//! ```no_run
//! use bulk_ingest::{BatchOrchestrator, Config, InMemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file(&"config.yaml".into())?;
//!     let items = bulk_ingest::io::read_batch_file("items.json".as_ref())?;
//!
//!     let orchestrator = BatchOrchestrator::new(Arc::new(InMemoryStore::new()), config)?;
//!     let summary = orchestrator.process("batch-1", items).await?;
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod io;
pub mod model;
pub mod pipeline;

pub use config::Config;
pub use error::{IngestError, StageError, StoreError};
pub use io::{CategoryClassifier, Classifier, InMemoryStore, ProductStore};
pub use model::{BatchItem, BatchState, BatchSummary, UniqueKey};
pub use pipeline::{BatchMetrics, BatchOrchestrator, ChunkValidator, MetricsSnapshot};

use anyhow::Result;
use std::sync::Arc;

/// Run one batch against a fresh in-memory store.
///
/// `seed` items are persisted before the batch runs, so they show up as
/// existing records.
pub async fn run_ingest(
    config: Config,
    batch_id: &str,
    items: Vec<BatchItem>,
    seed: &[BatchItem],
) -> Result<BatchSummary> {
    tracing::info!("Starting bulk ingestion");

    let store = Arc::new(InMemoryStore::new());
    if !seed.is_empty() {
        let seeded = store.seed(seed);
        tracing::info!("Seeded store with {} existing records", seeded);
    }

    let orchestrator = BatchOrchestrator::new(store.clone(), config)?
        .with_classifier(Arc::new(CategoryClassifier::new()));
    let summary = orchestrator.process(batch_id, items).await?;

    tracing::info!("Store now holds {} records", store.len());
    Ok(summary)
}

/// Build a Tokio runtime with the specified configuration.
pub fn build_runtime(worker_threads: Option<usize>) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();

    if let Some(threads) = worker_threads {
        builder.worker_threads(threads);
    }

    builder.enable_all();

    Ok(builder.build()?)
}
