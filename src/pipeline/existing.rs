//! Removal of items whose key is already persisted.

use crate::config::RetryConfig;
use crate::error::StageError;
use crate::io::ProductStore;
use crate::model::{BatchItem, UniqueKey};
use std::collections::HashSet;
use std::time::Duration;

/// Items that still need inserting.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExistingFilterResult {
    /// Items not yet in the store, in input order
    pub new_items: Vec<BatchItem>,
    pub existing_count: usize,
}

/// Drop items whose key the store already holds.
///
/// Issues a single batched lookup for all keys. A failed lookup is returned
/// as an error; unknown keys are never treated as new.
pub async fn filter_existing(
    items: Vec<BatchItem>,
    store: &dyn ProductStore,
) -> Result<ExistingFilterResult, StageError> {
    let single_attempt = RetryConfig {
        max_retries: 1,
        ..Default::default()
    };
    filter_existing_with_retry(items, store, &single_attempt).await
}

/// Like [`filter_existing`], retrying transient lookup failures with
/// exponential backoff.
pub async fn filter_existing_with_retry(
    items: Vec<BatchItem>,
    store: &dyn ProductStore,
    retry: &RetryConfig,
) -> Result<ExistingFilterResult, StageError> {
    if items.is_empty() {
        return Ok(ExistingFilterResult::default());
    }

    let keys: HashSet<UniqueKey> = items.iter().map(BatchItem::unique_key).collect();
    let existing = lookup_with_retry(store, &keys, retry).await?;

    let mut result = ExistingFilterResult {
        new_items: Vec::with_capacity(items.len()),
        existing_count: 0,
    };
    for item in items {
        if existing.contains(&item.unique_key()) {
            result.existing_count += 1;
        } else {
            result.new_items.push(item);
        }
    }

    tracing::debug!(
        "Existence check: {} keys, {} already stored",
        keys.len(),
        result.existing_count
    );
    Ok(result)
}

async fn lookup_with_retry(
    store: &dyn ProductStore,
    keys: &HashSet<UniqueKey>,
    retry: &RetryConfig,
) -> Result<HashSet<UniqueKey>, StageError> {
    let mut attempt = 0;
    let mut backoff = retry.initial_backoff_ms;

    loop {
        match store.find_existing_keys(keys).await {
            Ok(existing) => return Ok(existing),
            Err(e) => {
                let err = StageError::from(e);
                attempt += 1;
                if !err.is_transient() || attempt >= retry.max_retries {
                    tracing::error!("Existence lookup failed after {} attempts: {}", attempt, err);
                    return Err(err);
                }

                tracing::warn!(
                    "Existence lookup attempt {} failed: {}, retrying in {}ms",
                    attempt,
                    err,
                    backoff
                );

                tokio::time::sleep(Duration::from_millis(backoff)).await;
                backoff = (backoff * 2).min(retry.max_backoff_ms);
            }
        }
    }
}
