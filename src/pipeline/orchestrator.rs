//! Batch orchestration.
//!
//! A batch moves through
//! `Received -> Validating -> Deduplicating -> FilteringExisting -> Inserting
//! -> [Classifying] -> Summarized`, or to `Failed` from any non-terminal state.
//!
//! Only validation fans out over chunks. Deduplication, the existence check
//! and insertion run once over the flattened, ordered item set so that the
//! first occurrence of a key always wins and the store sees a single lookup.
//!
//! Each call to [`BatchOrchestrator::process`] owns a fresh [`BatchRun`] with
//! its own metrics, so concurrent batches never share counters.

use crate::config::Config;
use crate::error::{ClassifierError, IngestError, StageError};
use crate::io::{Classifier, ProductStore};
use crate::model::{
    BatchItem, BatchState, BatchSummary, Classification, InsertedItem, ItemError, ItemErrorKind,
    StageFailure, UniqueKey,
};
use crate::pipeline::dedup::deduplicate;
use crate::pipeline::executor::ParallelChunkExecutor;
use crate::pipeline::existing::filter_existing_with_retry;
use crate::pipeline::insert::insert;
use crate::pipeline::metrics::BatchMetrics;
use crate::pipeline::partition::partition;
use crate::pipeline::validation::{ChunkValidator, Validator};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Drives batches through the ingestion stages.
pub struct BatchOrchestrator {
    store: Arc<dyn ProductStore>,
    classifier: Option<Arc<dyn Classifier>>,
    validator: Arc<dyn ChunkValidator>,
    executor: ParallelChunkExecutor,
    config: Config,
}

impl BatchOrchestrator {
    /// Create an orchestrator writing to `store`.
    ///
    /// Fails with [`IngestError::InvalidConfig`] if the configuration is
    /// unusable.
    pub fn new(store: Arc<dyn ProductStore>, config: Config) -> Result<Self, IngestError> {
        config.validate()?;
        let executor = ParallelChunkExecutor::new(config.pipeline.concurrency())?;

        Ok(Self {
            store,
            classifier: None,
            validator: Arc::new(Validator::new(config.validation.clone())),
            executor,
            config,
        })
    }

    /// Replace the configured [`Validator`] with a custom chunk validator.
    pub fn with_validator(mut self, validator: Arc<dyn ChunkValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Classify inserted items with `classifier` when classification is enabled.
    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one batch to completion.
    ///
    /// Returns `Err` only for contract violations detected before any work
    /// starts (batch size out of bounds). Stage failures produce a summary in
    /// the `Failed` state carrying the counts gathered so far.
    pub async fn process(
        &self,
        batch_id: impl Into<String>,
        items: Vec<BatchItem>,
    ) -> Result<BatchSummary, IngestError> {
        let batch_id = batch_id.into();
        let pipeline = &self.config.pipeline;

        let size = items.len();
        if size < pipeline.min_batch_size || size > pipeline.max_batch_size {
            return Err(IngestError::BatchSizeOutOfBounds {
                size,
                min: pipeline.min_batch_size,
                max: pipeline.max_batch_size,
            });
        }

        let chunks = partition(items.into_iter().enumerate().collect(), pipeline.chunk_size)?;
        let timeout = pipeline.batch_timeout();
        let deadline = Instant::now().checked_add(timeout).ok_or_else(|| {
            IngestError::InvalidConfig(format!("batch timeout {:?} is out of range", timeout))
        })?;

        tracing::info!(
            "Batch {}: processing {} items in {} chunks",
            batch_id,
            size,
            chunks.len()
        );

        let mut run = BatchRun::new(batch_id, size);
        match self.run_stages(&mut run, chunks, deadline, timeout).await {
            Ok(()) => run.transition(BatchState::Summarized),
            Err(e) => run.fail(e),
        }

        Ok(run.into_summary())
    }

    async fn run_stages(
        &self,
        run: &mut BatchRun,
        chunks: Vec<Vec<(usize, BatchItem)>>,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<(), StageError> {
        // Validation, fanned out over chunks
        run.transition(BatchState::Validating);
        let validator = self.validator.clone();
        let outcomes = until_deadline(
            deadline,
            timeout,
            self.executor.execute(chunks, move |chunk| validator.check_chunk(chunk)),
        )
        .await?;

        let mut valid_items = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            if outcome.is_valid() {
                run.index_of
                    .entry(outcome.item.unique_key())
                    .or_insert(outcome.index);
                valid_items.push(outcome.item);
            } else {
                tracing::debug!(
                    "Item {} failed validation: {}",
                    outcome.index,
                    outcome.reasons.join("; ")
                );
                let key = outcome
                    .item
                    .sku
                    .as_deref()
                    .filter(|sku| !sku.trim().is_empty())
                    .map(UniqueKey::normalize);
                run.total_failed += 1;
                run.metrics.increment_failures();
                run.errors.push(ItemError {
                    index: Some(outcome.index),
                    key,
                    kind: ItemErrorKind::Validation,
                    message: outcome.reasons.join("; "),
                });
            }
        }
        run.total_valid = valid_items.len();

        // Deduplication
        check_deadline(deadline, timeout)?;
        run.transition(BatchState::Deduplicating);
        let dedup = deduplicate(valid_items);
        run.total_duplicates = dedup.duplicate_count;
        run.metrics.increment_duplicates_by(dedup.duplicate_count as u64);

        // Existence check
        run.transition(BatchState::FilteringExisting);
        let filtered = until_deadline(
            deadline,
            timeout,
            filter_existing_with_retry(
                dedup.unique_items,
                self.store.as_ref(),
                &self.config.pipeline.retry,
            ),
        )
        .await?;
        run.total_existing = filtered.existing_count;

        // Insertion
        run.transition(BatchState::Inserting);
        let outcome = until_deadline(
            deadline,
            timeout,
            insert(&filtered.new_items, self.store.as_ref()),
        )
        .await?;

        run.total_inserted = outcome.inserted.len();
        run.metrics.increment_ingested_by(outcome.inserted.len() as u64);
        for rejected in outcome.rejected {
            run.total_failed += 1;
            run.metrics.increment_failures();
            run.errors.push(ItemError {
                index: run.index_of.get(&rejected.key).copied(),
                message: rejected.error.to_string(),
                key: Some(rejected.key),
                kind: ItemErrorKind::ConstraintViolation,
            });
        }
        run.inserted = outcome.inserted;

        // Best-effort classification
        if let Some(classifier) = self.active_classifier(run) {
            run.transition(BatchState::Classifying);
            let results = until_deadline(
                deadline,
                timeout,
                classify_all(classifier, &run.inserted, self.config.classifier.concurrency),
            )
            .await?;
            run.record_classifications(results);
        }

        Ok(())
    }

    fn active_classifier(&self, run: &BatchRun) -> Option<Arc<dyn Classifier>> {
        if !self.config.classifier.enabled || run.inserted.is_empty() {
            return None;
        }
        self.classifier.clone()
    }
}

/// Classify every inserted item once, with bounded concurrency.
/// Results are returned in the order of `inserted`.
async fn classify_all(
    classifier: Arc<dyn Classifier>,
    inserted: &[InsertedItem],
    concurrency: usize,
) -> Result<Vec<(usize, Result<String, ClassifierError>)>, StageError> {
    let mut results: Vec<_> = stream::iter(inserted.iter().enumerate())
        .map(|(i, item)| {
            let classifier = classifier.clone();
            async move { (i, classifier.classify(item).await) }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    results.sort_by_key(|(i, _)| *i);
    Ok(results)
}

/// Await `fut`, failing with [`StageError::TimeoutExceeded`] once `deadline` passes.
async fn until_deadline<T, E>(
    deadline: Instant,
    timeout: Duration,
    fut: impl Future<Output = Result<T, E>>,
) -> Result<T, StageError>
where
    E: Into<StageError>,
{
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| StageError::TimeoutExceeded(timeout))?
        .map_err(Into::into)
}

fn check_deadline(deadline: Instant, timeout: Duration) -> Result<(), StageError> {
    if Instant::now() >= deadline {
        return Err(StageError::TimeoutExceeded(timeout));
    }
    Ok(())
}

/// State of one batch while it runs.
struct BatchRun {
    batch_id: String,
    state: BatchState,
    metrics: Arc<BatchMetrics>,
    started_at: DateTime<Utc>,

    total_received: usize,
    total_valid: usize,
    total_duplicates: usize,
    total_existing: usize,
    total_inserted: usize,
    total_failed: usize,

    // First batch index of every valid key, for locating insert-time errors
    index_of: HashMap<UniqueKey, usize>,
    errors: Vec<ItemError>,
    failure: Option<StageFailure>,
    inserted: Vec<InsertedItem>,
    classifications: Vec<Classification>,
}

impl BatchRun {
    fn new(batch_id: String, total_received: usize) -> Self {
        let metrics = BatchMetrics::new();
        metrics.start_batch();
        metrics.increment_received_by(total_received as u64);

        Self {
            batch_id,
            state: BatchState::Received,
            metrics,
            started_at: Utc::now(),
            total_received,
            total_valid: 0,
            total_duplicates: 0,
            total_existing: 0,
            total_inserted: 0,
            total_failed: 0,
            index_of: HashMap::new(),
            errors: Vec::new(),
            failure: None,
            inserted: Vec::new(),
            classifications: Vec::new(),
        }
    }

    fn transition(&mut self, next: BatchState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!("Batch {}: {} -> {}", self.batch_id, self.state, next);
        self.state = next;
    }

    fn fail(&mut self, err: StageError) {
        tracing::error!(
            "Batch {} failed while {}: {}",
            self.batch_id,
            self.state,
            err
        );
        self.failure = Some(StageFailure::new(self.state, &err));
        self.transition(BatchState::Failed);
    }

    fn record_classifications(
        &mut self,
        results: Vec<(usize, Result<String, ClassifierError>)>,
    ) {
        for (i, result) in results {
            let Some(item) = self.inserted.get(i) else {
                continue;
            };
            match result {
                Ok(label) => self.classifications.push(Classification {
                    id: item.id,
                    key: item.key.clone(),
                    label,
                }),
                Err(e) => {
                    tracing::warn!("Classification failed for {}: {}", item.key, e);
                    self.errors.push(ItemError {
                        index: self.index_of.get(&item.key).copied(),
                        key: Some(item.key.clone()),
                        kind: ItemErrorKind::Classifier,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    fn into_summary(self) -> BatchSummary {
        self.metrics.log_summary(&self.batch_id);

        let summary = BatchSummary {
            batch_id: self.batch_id,
            state: self.state,
            total_received: self.total_received,
            total_valid: self.total_valid,
            total_duplicates: self.total_duplicates,
            total_existing: self.total_existing,
            total_inserted: self.total_inserted,
            total_failed: self.total_failed,
            total_classified: self.classifications.len(),
            errors: self.errors,
            failure: self.failure,
            inserted: self.inserted,
            classifications: self.classifications,
            metrics: self.metrics.snapshot(),
            started_at: self.started_at,
            finished_at: Utc::now(),
        };

        tracing::info!("{}", summary);
        summary
    }
}
