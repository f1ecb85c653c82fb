//! Bulk write of new items.

use crate::error::StageError;
use crate::io::{BulkInsertOutcome, ProductStore};
use crate::model::BatchItem;

/// Hand `items` to the store in one bulk write.
///
/// Rows rejected individually by a partial-result store come back in
/// [`BulkInsertOutcome::rejected`]. A store that fails the whole call
/// produces a fatal [`StageError`]. Every input row must be accounted for
/// as either inserted or rejected.
pub async fn insert(
    items: &[BatchItem],
    store: &dyn ProductStore,
) -> Result<BulkInsertOutcome, StageError> {
    if items.is_empty() {
        return Ok(BulkInsertOutcome::default());
    }

    let outcome = store.bulk_insert(items).await.map_err(|e| {
        tracing::error!("Bulk insert of {} items failed: {}", items.len(), e);
        StageError::from(e)
    })?;

    if outcome.len() != items.len() {
        return Err(StageError::ResultMismatch {
            expected: items.len(),
            returned: outcome.len(),
        });
    }

    for rejected in &outcome.rejected {
        tracing::warn!("Insert rejected {}: {}", rejected.key, rejected.error);
    }
    tracing::debug!(
        "Bulk insert: {} inserted, {} rejected",
        outcome.inserted.len(),
        outcome.rejected.len()
    );

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FatalKind, StoreError};
    use crate::io::InMemoryStore;
    use crate::model::UniqueKey;
    use async_trait::async_trait;
    use std::collections::HashSet;

    fn items(skus: &[&str]) -> Vec<BatchItem> {
        skus.iter().map(|s| BatchItem::new(*s, "Item", 1.0)).collect()
    }

    /// Silently drops the last row.
    struct LossyStore;

    #[async_trait]
    impl ProductStore for LossyStore {
        async fn find_existing_keys(
            &self,
            _keys: &HashSet<UniqueKey>,
        ) -> Result<HashSet<UniqueKey>, StoreError> {
            Ok(HashSet::new())
        }

        async fn bulk_insert(&self, items: &[BatchItem]) -> Result<BulkInsertOutcome, StoreError> {
            let store = InMemoryStore::new();
            let mut outcome = store.bulk_insert(items).await?;
            outcome.inserted.pop();
            Ok(outcome)
        }
    }

    #[tokio::test]
    async fn test_insert_preserves_order() {
        let store = InMemoryStore::new();
        let outcome = insert(&items(&["c", "a", "b"]), &store).await.unwrap();

        let keys: Vec<&str> = outcome.inserted.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["C", "A", "B"]);
        assert!(outcome.rejected.is_empty());
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_partial_rejections_reported() {
        let store = InMemoryStore::new();
        store.seed(&items(&["b"]));

        let outcome = insert(&items(&["a", "b", "c"]), &store).await.unwrap();
        assert_eq!(outcome.inserted.len(), 2);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].key, UniqueKey::normalize("b"));
    }

    #[tokio::test]
    async fn test_atomic_conflict_is_fatal() {
        let store = InMemoryStore::atomic();
        store.seed(&items(&["b"]));

        let err = insert(&items(&["a", "b"]), &store).await.unwrap_err();
        assert_eq!(err.kind(), FatalKind::ConstraintViolation);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_store_unavailable_is_fatal() {
        let store = InMemoryStore::new();
        store.set_fail_inserts(true);

        let err = insert(&items(&["a"]), &store).await.unwrap_err();
        assert_eq!(err.kind(), FatalKind::UpstreamUnavailable);
    }

    #[tokio::test]
    async fn test_missing_rows_detected() {
        let err = insert(&items(&["a", "b"]), &LossyStore).await.unwrap_err();
        assert!(matches!(
            err,
            StageError::ResultMismatch { expected: 2, returned: 1 }
        ));
    }

    #[tokio::test]
    async fn test_empty_input_skips_store() {
        let store = InMemoryStore::new();
        let outcome = insert(&[], &store).await.unwrap();
        assert!(outcome.is_empty());
        assert_eq!(store.insert_calls(), 0);
    }
}
