//! Persistence store boundary.
//!
//! The pipeline talks to storage through two batched calls: one existence
//! lookup per batch and one bulk write for the remaining new items.

use crate::error::StoreError;
use crate::model::{BatchItem, InsertedItem, UniqueKey};
use async_trait::async_trait;
use std::collections::HashSet;

/// A row the store refused during a bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedItem {
    /// Position within the slice passed to [`ProductStore::bulk_insert`]
    pub position: usize,
    pub key: UniqueKey,
    pub error: StoreError,
}

/// Result of a bulk write.
///
/// `inserted` keeps the relative order of the input. Stores that cannot
/// report partial results either insert everything or return an error.
#[derive(Debug, Clone, Default)]
pub struct BulkInsertOutcome {
    pub inserted: Vec<InsertedItem>,
    pub rejected: Vec<RejectedItem>,
}

impl BulkInsertOutcome {
    /// Total number of rows accounted for.
    pub fn len(&self) -> usize {
        self.inserted.len() + self.rejected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Storage collaborator used by the existing-record filter and the
/// insertion stage.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Return the subset of `keys` that is already persisted.
    async fn find_existing_keys(
        &self,
        keys: &HashSet<UniqueKey>,
    ) -> Result<HashSet<UniqueKey>, StoreError>;

    /// Persist `items` in one call.
    async fn bulk_insert(&self, items: &[BatchItem]) -> Result<BulkInsertOutcome, StoreError>;
}
