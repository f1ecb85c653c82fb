//! Records flowing through the ingestion pipeline and the summary it produces.

use crate::error::{FatalKind, StageError};
use crate::pipeline::MetricsSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// A raw product record as submitted in a batch.
///
/// Every field is optional at the type level: a missing SKU or price is a
/// validation failure reported in the summary, not a deserialization error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    /// Identifier candidate, normalized into the [`UniqueKey`]
    #[serde(default)]
    pub sku: Option<String>,

    /// Display name
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Unit price
    #[serde(default)]
    pub price: Option<f64>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub brand: Option<String>,

    #[serde(default)]
    pub image_urls: Vec<String>,

    /// Free-form attributes (color, size, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl BatchItem {
    /// Create an item with the fields every valid record needs.
    pub fn new(sku: impl Into<String>, name: impl Into<String>, price: f64) -> Self {
        Self {
            sku: Some(sku.into()),
            name: Some(name.into()),
            price: Some(price),
            ..Default::default()
        }
    }

    /// Set the category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// The normalized identity of this item.
    pub fn unique_key(&self) -> UniqueKey {
        UniqueKey::normalize(self.sku.as_deref().unwrap_or(""))
    }
}

/// Normalized identity used for deduplication and existence checks.
///
/// Derived from the SKU by trimming surrounding whitespace and upper-casing,
/// so `" abc-1"` and `"ABC-1 "` collapse to the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueKey(String);

impl UniqueKey {
    pub fn normalize(raw: &str) -> Self {
        Self(raw.trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UniqueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Verdict of the validation stage for one input item.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    /// Position of the item in the submitted batch
    pub index: usize,
    pub item: BatchItem,
    pub valid: bool,
    /// Every violated rule, in rule order
    pub reasons: Vec<String>,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// An item persisted by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertedItem {
    /// Store-assigned identifier
    pub id: Uuid,
    pub key: UniqueKey,
    pub item: BatchItem,
    pub inserted_at: DateTime<Utc>,
}

/// Label produced by the classification collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub id: Uuid,
    pub key: UniqueKey,
    pub label: String,
}

/// Lifecycle of a batch inside the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Received,
    Validating,
    Deduplicating,
    FilteringExisting,
    Inserting,
    Classifying,
    Summarized,
    Failed,
}

impl BatchState {
    /// Whether the batch has finished, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchState::Summarized | BatchState::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: BatchState) -> bool {
        use BatchState::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Failed) => true,
            (Received, Validating)
            | (Validating, Deduplicating)
            | (Deduplicating, FilteringExisting)
            | (FilteringExisting, Inserting)
            | (Inserting, Classifying)
            | (Inserting, Summarized)
            | (Classifying, Summarized) => true,
            _ => false,
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Received => "received",
            BatchState::Validating => "validating",
            BatchState::Deduplicating => "deduplicating",
            BatchState::FilteringExisting => "filtering_existing",
            BatchState::Inserting => "inserting",
            BatchState::Classifying => "classifying",
            BatchState::Summarized => "summarized",
            BatchState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Category of a per-item error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemErrorKind {
    Validation,
    ConstraintViolation,
    Classifier,
}

/// A recoverable failure tied to one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    /// Position in the submitted batch, when known
    pub index: Option<usize>,
    pub key: Option<UniqueKey>,
    pub kind: ItemErrorKind,
    pub message: String,
}

impl fmt::Display for ItemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.index, &self.key) {
            (Some(index), _) => write!(f, "item {}: {}", index, self.message),
            (None, Some(key)) => write!(f, "key {}: {}", key, self.message),
            (None, None) => f.write_str(&self.message),
        }
    }
}

/// The fatal failure that stopped a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageFailure {
    /// Stage that was running when the failure occurred
    pub stage: BatchState,
    pub kind: FatalKind,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: BatchState, err: &StageError) -> Self {
        Self {
            stage,
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Outcome of one batch run.
///
/// Counts obey `total_valid == unique + total_duplicates` and
/// `unique == new + total_existing`; every new item is either inserted or
/// counted in `total_failed`, unless the batch failed before insertion.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    /// `Summarized` or `Failed`
    pub state: BatchState,
    pub total_received: usize,
    pub total_valid: usize,
    pub total_duplicates: usize,
    pub total_existing: usize,
    pub total_inserted: usize,
    /// Validation failures plus rows rejected at insert time
    pub total_failed: usize,
    pub total_classified: usize,
    pub errors: Vec<ItemError>,
    pub failure: Option<StageFailure>,
    pub inserted: Vec<InsertedItem>,
    pub classifications: Vec<Classification>,
    pub metrics: MetricsSnapshot,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.state == BatchState::Summarized
    }

    /// Error messages in the order they were recorded.
    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Batch {} [{}]: received {}, valid {}, duplicates {}, existing {}, inserted {}, failed {}, classified {}",
            self.batch_id,
            self.state,
            self.total_received,
            self.total_valid,
            self.total_duplicates,
            self.total_existing,
            self.total_inserted,
            self.total_failed,
            self.total_classified,
        )?;
        if let Some(failure) = &self.failure {
            write!(f, " | failed at {}: {}", failure.stage, failure.message)?;
        }
        Ok(())
    }
}
