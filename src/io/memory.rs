//! In-memory [`ProductStore`] backed by a concurrent map.
//!
//! Used by the CLI and by tests. Supports two write modes:
//!
//! - **Partial**: conflicting rows are rejected one by one, the rest land.
//! - **Atomic**: any conflict fails the whole call and nothing is written.
//!
//! Lookups and writes can be switched to fail with
//! [`StoreError::Unavailable`] to exercise the fatal paths.

use crate::error::StoreError;
use crate::io::store::{BulkInsertOutcome, ProductStore, RejectedItem};
use crate::model::{BatchItem, InsertedItem, UniqueKey};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

/// How a bulk write handles unique-key conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    #[default]
    Partial,
    Atomic,
}

/// Concurrent in-memory product table keyed by [`UniqueKey`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    rows: DashMap<UniqueKey, InsertedItem>,
    mode: WriteMode,
    fail_lookups: AtomicBool,
    fail_inserts: AtomicBool,
    lookup_calls: AtomicU64,
    insert_calls: AtomicU64,
    latency: Option<Duration>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that fails a bulk write as a whole on any conflict.
    pub fn atomic() -> Self {
        Self {
            mode: WriteMode::Atomic,
            ..Default::default()
        }
    }

    /// Delay every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert items directly, bypassing fault injection.
    pub fn seed<'a>(&self, items: impl IntoIterator<Item = &'a BatchItem>) -> usize {
        let mut seeded = 0;
        for item in items {
            let key = item.unique_key();
            if !self.rows.contains_key(&key) {
                self.rows.insert(key.clone(), new_row(key, item));
                seeded += 1;
            }
        }
        seeded
    }

    /// Make subsequent existence lookups fail.
    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::Relaxed);
    }

    /// Make subsequent bulk writes fail.
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::Relaxed);
    }

    /// Number of existence lookups served or refused.
    pub fn lookup_calls(&self) -> u64 {
        self.lookup_calls.load(Ordering::Relaxed)
    }

    /// Number of bulk writes served or refused.
    pub fn insert_calls(&self) -> u64 {
        self.insert_calls.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, key: &UniqueKey) -> bool {
        self.rows.contains_key(key)
    }

    pub fn get(&self, key: &UniqueKey) -> Option<InsertedItem> {
        self.rows.get(key).map(|row| row.value().clone())
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn insert_partial(&self, items: &[BatchItem]) -> BulkInsertOutcome {
        let mut outcome = BulkInsertOutcome::default();

        for (position, item) in items.iter().enumerate() {
            let key = item.unique_key();
            match self.rows.entry(key.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    outcome.rejected.push(RejectedItem {
                        position,
                        error: StoreError::ConstraintViolation {
                            key: key.to_string(),
                        },
                        key,
                    });
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    let row = new_row(key, item);
                    slot.insert(row.clone());
                    outcome.inserted.push(row);
                }
            }
        }

        outcome
    }

    fn insert_atomic(&self, items: &[BatchItem]) -> Result<BulkInsertOutcome, StoreError> {
        let mut seen = HashSet::with_capacity(items.len());
        for item in items {
            let key = item.unique_key();
            if self.rows.contains_key(&key) || !seen.insert(key.clone()) {
                return Err(StoreError::ConstraintViolation {
                    key: key.to_string(),
                });
            }
        }

        // Checked above; a concurrent writer can still slip in between, in
        // which case that row is reported like any other conflict.
        Ok(self.insert_partial(items))
    }
}

fn new_row(key: UniqueKey, item: &BatchItem) -> InsertedItem {
    InsertedItem {
        id: Uuid::new_v4(),
        key,
        item: item.clone(),
        inserted_at: Utc::now(),
    }
}

#[async_trait]
impl ProductStore for InMemoryStore {
    async fn find_existing_keys(
        &self,
        keys: &HashSet<UniqueKey>,
    ) -> Result<HashSet<UniqueKey>, StoreError> {
        self.lookup_calls.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;

        if self.fail_lookups.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("existence lookup refused".to_string()));
        }

        Ok(keys
            .iter()
            .filter(|key| self.rows.contains_key(*key))
            .cloned()
            .collect())
    }

    async fn bulk_insert(&self, items: &[BatchItem]) -> Result<BulkInsertOutcome, StoreError> {
        self.insert_calls.fetch_add(1, Ordering::Relaxed);
        self.simulate_latency().await;

        if self.fail_inserts.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("bulk insert refused".to_string()));
        }

        match self.mode {
            WriteMode::Partial => Ok(self.insert_partial(items)),
            WriteMode::Atomic => self.insert_atomic(items),
        }
    }
}
