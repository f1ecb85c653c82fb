//! Ordered deduplication on [`UniqueKey`].

use crate::model::{BatchItem, UniqueKey};
use std::collections::HashSet;

/// Items left after collapsing duplicate keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeduplicationResult {
    /// First occurrence of every key, in input order
    pub unique_items: Vec<BatchItem>,
    pub duplicate_count: usize,
}

/// Keep the first item seen for each key and count the rest.
///
/// "First" is input order, so callers must hand over a fully flattened,
/// ordered sequence.
pub fn deduplicate(items: Vec<BatchItem>) -> DeduplicationResult {
    let mut seen: HashSet<UniqueKey> = HashSet::with_capacity(items.len());
    let mut result = DeduplicationResult {
        unique_items: Vec::with_capacity(items.len()),
        duplicate_count: 0,
    };

    for item in items {
        let key = item.unique_key();
        if seen.insert(key.clone()) {
            result.unique_items.push(item);
        } else {
            tracing::debug!("Dropping duplicate of {}", key);
            result.duplicate_count += 1;
        }
    }

    result
}
