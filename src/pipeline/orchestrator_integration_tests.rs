//! End-to-end tests for BatchOrchestrator against the in-memory store.
//!
//! Tests cover:
//! 1. Outcome accounting on a mixed batch (invalid, duplicate, existing, new)
//! 2. Fatal stage failures (lookup outage, atomic conflict, timeout,
//!    validation timeout, failed validation chunk)
//! 3. Partial insert rejections
//! 4. Batch size bounds and configuration errors
//! 5. Best-effort classification
//! 6. Isolation between concurrent batches

use crate::config::{Config, RetryConfig};
use crate::error::{ClassifierError, FatalKind, IngestError, StoreError};
use crate::io::{BulkInsertOutcome, CategoryClassifier, Classifier, InMemoryStore, ProductStore};
use crate::model::{
    BatchItem, BatchState, InsertedItem, ItemErrorKind, UniqueKey, ValidationOutcome,
};
use crate::pipeline::{BatchOrchestrator, ChunkValidator, Validator};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn test_config() -> Config {
    let mut config = Config::default();
    config.pipeline.chunk_size = 10;
    config.pipeline.max_concurrent_chunks = Some(4);
    config.pipeline.min_batch_size = 1;
    config.pipeline.retry = RetryConfig {
        max_retries: 2,
        initial_backoff_ms: 1,
        max_backoff_ms: 2,
    };
    config.classifier.enabled = false;
    config
}

/// 100 items: 51-54 repeat the key of item 50, item 99 has a blank name.
fn scenario_items() -> Vec<BatchItem> {
    (0..100)
        .map(|i| {
            let sku = if (51..55).contains(&i) {
                " sku-50 ".to_string()
            } else {
                format!("SKU-{}", i)
            };
            let name = if i == 99 {
                "   ".to_string()
            } else {
                format!("Item {}", i)
            };
            BatchItem::new(sku, name, 10.0 + i as f64).with_category("office supplies")
        })
        .collect()
}

fn distinct_items(prefix: &str, n: usize) -> Vec<BatchItem> {
    (0..n)
        .map(|i| BatchItem::new(format!("{}-{}", prefix, i), format!("Item {}", i), 1.0))
        .collect()
}

/// Store whose existence lookup never sees persisted rows, so every conflict
/// surfaces at insert time like a concurrent writer winning the race.
struct StaleLookupStore {
    inner: InMemoryStore,
}

#[async_trait]
impl ProductStore for StaleLookupStore {
    async fn find_existing_keys(
        &self,
        _keys: &HashSet<UniqueKey>,
    ) -> Result<HashSet<UniqueKey>, StoreError> {
        Ok(HashSet::new())
    }

    async fn bulk_insert(&self, items: &[BatchItem]) -> Result<BulkInsertOutcome, StoreError> {
        self.inner.bulk_insert(items).await
    }
}

/// Counts calls and delegates to a [`CategoryClassifier`].
#[derive(Default)]
struct CountingClassifier {
    inner: CategoryClassifier,
    calls: AtomicUsize,
}

#[async_trait]
impl Classifier for CountingClassifier {
    async fn classify(&self, item: &InsertedItem) -> Result<String, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.classify(item).await
    }
}

/// Sleeps before delegating, holding the blocking worker past the deadline.
struct SlowValidator {
    inner: Validator,
    delay: Duration,
}

impl ChunkValidator for SlowValidator {
    fn check_chunk(
        &self,
        chunk: Vec<(usize, BatchItem)>,
    ) -> anyhow::Result<Vec<ValidationOutcome>> {
        std::thread::sleep(self.delay);
        self.inner.check_chunk(chunk)
    }
}

/// Fails any chunk holding `failing_index`, validates the rest normally.
struct FailingValidator {
    inner: Validator,
    failing_index: usize,
}

impl ChunkValidator for FailingValidator {
    fn check_chunk(
        &self,
        chunk: Vec<(usize, BatchItem)>,
    ) -> anyhow::Result<Vec<ValidationOutcome>> {
        if chunk.iter().any(|(index, _)| *index == self.failing_index) {
            anyhow::bail!("validator unavailable for item {}", self.failing_index);
        }
        self.inner.check_chunk(chunk)
    }
}

/// Test 1: Mixed batch produces exact outcome counts
#[tokio::test]
async fn test_end_to_end_outcome_counts() {
    let items = scenario_items();
    let store = Arc::new(InMemoryStore::new());
    store.seed(&items[..5]);

    let orchestrator = BatchOrchestrator::new(store.clone(), test_config()).unwrap();
    let summary = orchestrator.process("batch-1", items).await.unwrap();

    assert_eq!(summary.state, BatchState::Summarized);
    assert!(summary.is_success());
    assert!(summary.failure.is_none());
    assert_eq!(summary.batch_id, "batch-1");
    assert_eq!(summary.total_received, 100);
    assert_eq!(summary.total_valid, 99);
    assert_eq!(summary.total_duplicates, 4);
    assert_eq!(summary.total_existing, 5);
    assert_eq!(summary.total_inserted, 90);
    assert_eq!(summary.total_failed, 1);
    assert_eq!(
        summary.total_inserted
            + summary.total_failed
            + summary.total_duplicates
            + summary.total_existing,
        summary.total_received
    );

    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].index, Some(99));
    assert_eq!(summary.errors[0].kind, ItemErrorKind::Validation);
    assert_eq!(summary.error_messages(), vec!["item 99: name is required".to_string()]);

    assert_eq!(summary.metrics.received, 100);
    assert_eq!(summary.metrics.ingested, 90);
    assert_eq!(summary.metrics.duplicates, 4);
    assert_eq!(summary.metrics.failures, 1);
    assert_eq!(summary.metrics.success_rate, 90.0);
    assert!(summary.finished_at >= summary.started_at);

    // First occurrence of the duplicated key was kept
    let row = store.get(&UniqueKey::normalize("sku-50")).unwrap();
    assert_eq!(row.item.name.as_deref(), Some("Item 50"));
    assert_eq!(store.len(), 95);
}

/// Test 2: Valid, duplicate-free input is inserted in full, in order
#[tokio::test]
async fn test_clean_batch_fully_inserted() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = BatchOrchestrator::new(store.clone(), test_config()).unwrap();

    let summary = orchestrator
        .process("clean", distinct_items("clean", 37))
        .await
        .unwrap();

    assert_eq!(summary.total_received, 37);
    assert_eq!(summary.total_inserted, 37);
    assert_eq!(summary.total_failed + summary.total_duplicates + summary.total_existing, 0);
    let keys: Vec<String> = summary.inserted.iter().map(|i| i.key.to_string()).collect();
    let expected: Vec<String> = (0..37).map(|i| format!("CLEAN-{}", i)).collect();
    assert_eq!(keys, expected);
}

/// Test 3: Existence check and insert each hit the store exactly once
#[tokio::test]
async fn test_single_lookup_and_insert_call() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = BatchOrchestrator::new(store.clone(), test_config()).unwrap();

    orchestrator.process("calls", scenario_items()).await.unwrap();

    assert_eq!(store.lookup_calls(), 1);
    assert_eq!(store.insert_calls(), 1);
}

/// Test 4: Lookup outage fails the batch but keeps earlier counts
#[tokio::test]
async fn test_lookup_outage_fails_batch() {
    let store = Arc::new(InMemoryStore::new());
    store.set_fail_lookups(true);
    let orchestrator = BatchOrchestrator::new(store.clone(), test_config()).unwrap();

    let summary = orchestrator.process("outage", scenario_items()).await.unwrap();

    assert_eq!(summary.state, BatchState::Failed);
    assert!(!summary.is_success());
    let failure = summary.failure.as_ref().unwrap();
    assert_eq!(failure.stage, BatchState::FilteringExisting);
    assert_eq!(failure.kind, FatalKind::UpstreamUnavailable);

    assert_eq!(summary.total_valid, 99);
    assert_eq!(summary.total_duplicates, 4);
    assert_eq!(summary.total_inserted, 0);
    assert!(summary.inserted.is_empty());

    // Retried per the retry policy, never reached insertion
    assert_eq!(store.lookup_calls(), 2);
    assert_eq!(store.insert_calls(), 0);
    assert!(store.is_empty());
}

/// Test 5: Atomic store conflict fails the batch with nothing inserted
#[tokio::test]
async fn test_atomic_conflict_fails_batch() {
    let items = distinct_items("race", 20);
    let store = Arc::new(StaleLookupStore {
        inner: InMemoryStore::atomic(),
    });
    store.inner.seed(&items[3..4]);

    let orchestrator = BatchOrchestrator::new(store.clone(), test_config()).unwrap();
    let summary = orchestrator.process("atomic", items).await.unwrap();

    assert_eq!(summary.state, BatchState::Failed);
    let failure = summary.failure.as_ref().unwrap();
    assert_eq!(failure.stage, BatchState::Inserting);
    assert_eq!(failure.kind, FatalKind::ConstraintViolation);
    assert_eq!(summary.total_inserted, 0);
    assert_eq!(store.inner.len(), 1);
}

/// Test 6: Partial-result store reports conflicting rows per item
#[tokio::test]
async fn test_partial_rejections_reported_per_item() {
    let items = scenario_items();
    let store = Arc::new(StaleLookupStore {
        inner: InMemoryStore::new(),
    });
    store.inner.seed(&items[..5]);

    let orchestrator = BatchOrchestrator::new(store.clone(), test_config()).unwrap();
    let summary = orchestrator.process("partial", items).await.unwrap();

    assert_eq!(summary.state, BatchState::Summarized);
    assert_eq!(summary.total_existing, 0);
    assert_eq!(summary.total_inserted, 90);
    assert_eq!(summary.total_failed, 6);

    let rejected: Vec<Option<usize>> = summary
        .errors
        .iter()
        .filter(|e| e.kind == ItemErrorKind::ConstraintViolation)
        .map(|e| e.index)
        .collect();
    assert_eq!(rejected, vec![Some(0), Some(1), Some(2), Some(3), Some(4)]);
    assert_eq!(summary.metrics.failures, 6);
}

/// Test 7: Batch deadline turns a stalled stage into a timeout failure
#[tokio::test]
async fn test_batch_timeout() {
    let store = Arc::new(InMemoryStore::new().with_latency(Duration::from_secs(5)));
    let mut config = test_config();
    config.pipeline.batch_timeout_secs = 1;
    let orchestrator = BatchOrchestrator::new(store.clone(), config).unwrap();

    let start = std::time::Instant::now();
    let summary = orchestrator.process("slow", distinct_items("slow", 10)).await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(4));
    assert_eq!(summary.state, BatchState::Failed);
    let failure = summary.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FatalKind::TimeoutExceeded);
    assert_eq!(failure.stage, BatchState::FilteringExisting);
    assert_eq!(summary.total_valid, 10);
    assert_eq!(summary.total_inserted, 0);
}

/// Test 8: Batches outside the configured bounds are rejected up front
#[tokio::test]
async fn test_batch_size_bounds() {
    let store = Arc::new(InMemoryStore::new());
    let mut config = test_config();
    config.pipeline.min_batch_size = 30;
    config.pipeline.max_batch_size = 50;
    let orchestrator = BatchOrchestrator::new(store.clone(), config).unwrap();

    let err = orchestrator
        .process("small", distinct_items("small", 29))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        IngestError::BatchSizeOutOfBounds { size: 29, min: 30, max: 50 }
    ));

    let err = orchestrator
        .process("large", distinct_items("large", 51))
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::BatchSizeOutOfBounds { size: 51, .. }));

    assert_eq!(store.lookup_calls(), 0);
    assert!(orchestrator.process("ok", distinct_items("ok", 30)).await.is_ok());
}

/// Test 9: Unusable configuration is rejected before any batch runs
#[test]
fn test_invalid_config_rejected() {
    let mut config = test_config();
    config.pipeline.chunk_size = 0;

    let result = BatchOrchestrator::new(Arc::new(InMemoryStore::new()), config);
    assert!(matches!(result, Err(IngestError::InvalidConfig(_))));
    let mut config = test_config();
    config.pipeline.batch_timeout_secs = u64::MAX;
    let result = BatchOrchestrator::new(Arc::new(InMemoryStore::new()), config);
    assert!(matches!(result, Err(IngestError::InvalidConfig(_))));
}

/// Test 10: Classification failures are recorded without failing the batch
#[tokio::test]
async fn test_classification_is_best_effort() {
    let items: Vec<BatchItem> = (0..10)
        .map(|i| {
            let item = BatchItem::new(format!("cls-{}", i), format!("Item {}", i), 5.0);
            if i % 2 == 0 {
                item.with_category("kitchen")
            } else {
                item
            }
        })
        .collect();

    let store = Arc::new(InMemoryStore::new());
    let classifier = Arc::new(CountingClassifier::default());
    let mut config = test_config();
    config.classifier.enabled = true;
    config.classifier.concurrency = 3;

    let orchestrator = BatchOrchestrator::new(store, config)
        .unwrap()
        .with_classifier(classifier.clone());
    let summary = orchestrator.process("classify", items).await.unwrap();

    assert_eq!(summary.state, BatchState::Summarized);
    assert_eq!(summary.total_inserted, 10);
    assert_eq!(summary.total_classified, 5);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 10);

    let keys: Vec<&str> = summary.classifications.iter().map(|c| c.key.as_str()).collect();
    assert_eq!(keys, vec!["CLS-0", "CLS-2", "CLS-4", "CLS-6", "CLS-8"]);
    assert!(summary.classifications.iter().all(|c| c.label == "Kitchen"));

    let failed: Vec<Option<usize>> = summary
        .errors
        .iter()
        .filter(|e| e.kind == ItemErrorKind::Classifier)
        .map(|e| e.index)
        .collect();
    assert_eq!(failed, vec![Some(1), Some(3), Some(5), Some(7), Some(9)]);
    // Classification failures are not counted as failed items
    assert_eq!(summary.total_failed, 0);
}

/// Test 11: Disabled classification never calls the classifier
#[tokio::test]
async fn test_classification_disabled() {
    let classifier = Arc::new(CountingClassifier::default());
    let orchestrator = BatchOrchestrator::new(Arc::new(InMemoryStore::new()), test_config())
        .unwrap()
        .with_classifier(classifier.clone());

    let summary = orchestrator.process("off", distinct_items("off", 5)).await.unwrap();

    assert_eq!(summary.total_classified, 0);
    assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
}

/// Test 12: Validation errors keep input order across chunks
#[tokio::test]
async fn test_validation_errors_in_input_order() {
    let mut items = distinct_items("order", 60);
    for i in [58, 3, 27] {
        items[i].price = Some(-1.0);
    }

    let orchestrator =
        BatchOrchestrator::new(Arc::new(InMemoryStore::new()), test_config()).unwrap();
    let summary = orchestrator.process("order", items).await.unwrap();

    let indices: Vec<Option<usize>> = summary.errors.iter().map(|e| e.index).collect();
    assert_eq!(indices, vec![Some(3), Some(27), Some(58)]);
    assert_eq!(summary.total_inserted, 57);
}

/// Test 13: A batch with no valid items skips the store entirely
#[tokio::test]
async fn test_all_invalid_batch() {
    let items: Vec<BatchItem> = (0..12).map(|_| BatchItem::default()).collect();
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = BatchOrchestrator::new(store.clone(), test_config()).unwrap();

    let summary = orchestrator.process("invalid", items).await.unwrap();

    assert_eq!(summary.state, BatchState::Summarized);
    assert_eq!(summary.total_valid, 0);
    assert_eq!(summary.total_failed, 12);
    assert!(summary.errors.iter().all(|e| e.key.is_none()));
    assert_eq!(store.lookup_calls(), 0);
    assert_eq!(store.insert_calls(), 0);
}

/// Test 14: Concurrent batches on one orchestrator keep separate counts
#[tokio::test]
async fn test_concurrent_batches_isolated() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = BatchOrchestrator::new(store.clone(), test_config()).unwrap();

    let (a, b) = tokio::join!(
        orchestrator.process("a", distinct_items("a", 40)),
        orchestrator.process("b", distinct_items("b", 25)),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.metrics.received, 40);
    assert_eq!(a.total_inserted, 40);
    assert_eq!(b.metrics.received, 25);
    assert_eq!(b.total_inserted, 25);
    assert_eq!(store.len(), 65);
}

/// Test 15: Deadline expiring during validation fails the batch at Validating
#[tokio::test]
async fn test_validation_timeout() {
    let store = Arc::new(InMemoryStore::new());
    let mut config = test_config();
    config.pipeline.batch_timeout_secs = 1;
    let orchestrator = BatchOrchestrator::new(store.clone(), config)
        .unwrap()
        .with_validator(Arc::new(SlowValidator {
            inner: Validator::default(),
            delay: Duration::from_secs(2),
        }));

    // Half the items are invalid, none may be counted once the deadline passes
    let mut items = distinct_items("late", 5);
    items.extend((0..5).map(|_| BatchItem::default()));

    let start = std::time::Instant::now();
    let summary = orchestrator.process("late", items).await.unwrap();

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(summary.state, BatchState::Failed);
    let failure = summary.failure.as_ref().unwrap();
    assert_eq!(failure.stage, BatchState::Validating);
    assert_eq!(failure.kind, FatalKind::TimeoutExceeded);

    assert_eq!(summary.total_received, 10);
    assert_eq!(summary.total_valid, 0);
    assert_eq!(summary.total_inserted, 0);
    assert_eq!(summary.total_failed, 0);
    assert_eq!(summary.metrics.failures, 0);
    assert!(summary.errors.is_empty());
    assert_eq!(store.lookup_calls(), 0);
    assert_eq!(store.insert_calls(), 0);
}

/// Test 16: A failed validation chunk fails the whole batch
#[tokio::test]
async fn test_validation_chunk_failure() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = BatchOrchestrator::new(store.clone(), test_config())
        .unwrap()
        .with_validator(Arc::new(FailingValidator {
            inner: Validator::default(),
            failing_index: 25,
        }));

    let summary = orchestrator
        .process("broken", distinct_items("broken", 40))
        .await
        .unwrap();

    assert_eq!(summary.state, BatchState::Failed);
    let failure = summary.failure.as_ref().unwrap();
    assert_eq!(failure.stage, BatchState::Validating);
    assert_eq!(failure.kind, FatalKind::ChunkFailure);
    assert!(failure.message.contains("validator unavailable for item 25"));

    // Sibling chunks succeeded, but no partial results are kept
    assert_eq!(summary.total_received, 40);
    assert_eq!(summary.total_valid, 0);
    assert_eq!(summary.total_inserted, 0);
    assert!(summary.inserted.is_empty());
    assert_eq!(store.lookup_calls(), 0);
    assert_eq!(store.insert_calls(), 0);
    assert!(store.is_empty());
}
