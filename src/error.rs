//! Error types for the ingestion core.
//!
//! Contract violations ([`IngestError`]) are reported before any processing
//! starts. Everything that can go wrong while a batch is running ends up in
//! the batch summary instead, either as a per-item error or as the single
//! fatal [`StageError`] that stopped the run.

use std::time::Duration;

/// Contract violations raised before a batch is processed.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("batch size {size} outside allowed range {min}..={max}")]
    BatchSizeOutOfBounds { size: usize, min: usize, max: usize },
}

/// Errors returned by the persistence store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("unique constraint violated for key {key}")]
    ConstraintViolation { key: String },
}

/// Errors returned by the classification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier unavailable: {0}")]
    Unavailable(String),

    #[error("classifier rejected item: {0}")]
    Rejected(String),
}

/// Why a single chunk failed inside the parallel executor.
#[derive(Debug, thiserror::Error)]
pub enum ChunkFailure {
    #[error("{0}")]
    Failed(anyhow::Error),

    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Aggregate error carrying every failed chunk, ordered by chunk index.
#[derive(Debug, thiserror::Error)]
#[error("{} of {total_chunks} chunks failed: {}", .failures.len(), describe(.failures))]
pub struct ChunkFailures {
    pub total_chunks: usize,
    pub failures: Vec<(usize, ChunkFailure)>,
}

fn describe(failures: &[(usize, ChunkFailure)]) -> String {
    failures
        .iter()
        .map(|(idx, e)| format!("chunk {}: {}", idx, e))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ChunkFailures {
    /// Indices of the chunks that failed.
    pub fn chunk_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|(idx, _)| *idx).collect()
    }
}

/// A failure that aborts the remaining stages of a batch.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[source] StoreError),

    #[error("constraint violation: {0}")]
    ConstraintViolation(#[source] StoreError),

    #[error("batch timed out after {0:?}")]
    TimeoutExceeded(Duration),

    #[error(transparent)]
    Chunks(#[from] ChunkFailures),

    #[error("store returned {returned} results for {expected} items")]
    ResultMismatch { expected: usize, returned: usize },
}

impl StageError {
    /// Classify the error for the batch summary.
    pub fn kind(&self) -> FatalKind {
        match self {
            StageError::UpstreamUnavailable(_) => FatalKind::UpstreamUnavailable,
            StageError::ConstraintViolation(_) => FatalKind::ConstraintViolation,
            StageError::TimeoutExceeded(_) => FatalKind::TimeoutExceeded,
            StageError::Chunks(_) => FatalKind::ChunkFailure,
            StageError::ResultMismatch { .. } => FatalKind::UpstreamUnavailable,
        }
    }

    /// Whether retrying the same call could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StageError::UpstreamUnavailable(_))
    }
}

impl From<StoreError> for StageError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) => StageError::UpstreamUnavailable(err),
            StoreError::ConstraintViolation { .. } => StageError::ConstraintViolation(err),
        }
    }
}

/// Serializable category of a fatal stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalKind {
    UpstreamUnavailable,
    ConstraintViolation,
    TimeoutExceeded,
    ChunkFailure,
}
