//! Bounded-concurrency fan-out/fan-in over chunks.
//!
//! Chunks are pushed onto a shared work queue drained by a fixed number of
//! workers. Each worker runs the transform on the blocking pool (validation
//! is CPU-bound) and records the result under the chunk's index. Results are
//! concatenated by ascending chunk index once every worker has finished, so
//! output order never depends on completion order.
//!
//! A failing or panicking chunk does not cancel its siblings; all failures are
//! reported together after the run.

use crate::config::available_parallelism;
use crate::error::{ChunkFailure, ChunkFailures, IngestError};
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;

type ChunkOutcome<R> = std::result::Result<Vec<R>, ChunkFailure>;

/// Runs a per-chunk transform across chunks with bounded concurrency.
#[derive(Debug, Clone)]
pub struct ParallelChunkExecutor {
    concurrency: usize,
}

impl Default for ParallelChunkExecutor {
    fn default() -> Self {
        Self {
            concurrency: available_parallelism(),
        }
    }
}

impl ParallelChunkExecutor {
    /// Create an executor running at most `concurrency` chunks at once.
    pub fn new(concurrency: usize) -> Result<Self, IngestError> {
        if concurrency == 0 {
            return Err(IngestError::InvalidArgument(
                "executor concurrency must be positive".to_string(),
            ));
        }
        Ok(Self { concurrency })
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Apply `transform` to every chunk and concatenate the results in chunk
    /// order.
    ///
    /// Returns [`ChunkFailures`] listing every failed chunk if any transform
    /// returned an error or panicked. Zero chunks return immediately.
    pub async fn execute<T, R, F>(
        &self,
        chunks: Vec<Vec<T>>,
        transform: F,
    ) -> std::result::Result<Vec<R>, ChunkFailures>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(Vec<T>) -> Result<Vec<R>> + Send + Sync + 'static,
    {
        let total_chunks = chunks.len();
        if total_chunks == 0 {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let transform = Arc::new(transform);
        let num_workers = self.concurrency.min(total_chunks);

        // Queue capacity covers every chunk, so sends never wait
        let (work_tx, work_rx) = async_channel::bounded::<(usize, Vec<T>)>(total_chunks);
        for (chunk_idx, chunk) in chunks.into_iter().enumerate() {
            if let Err(e) = work_tx.send((chunk_idx, chunk)).await {
                tracing::error!("Chunk queue closed early, chunk {} not dispatched", e.0 .0);
                break;
            }
        }
        work_tx.close();

        tracing::debug!(
            "Dispatching {} chunks to {} workers",
            total_chunks,
            num_workers
        );

        let mut handles = Vec::with_capacity(num_workers);
        for _ in 0..num_workers {
            let work_rx = work_rx.clone();
            let transform = transform.clone();

            handles.push(tokio::spawn(async move {
                let mut completed: Vec<(usize, ChunkOutcome<R>)> = Vec::new();

                while let Ok((chunk_idx, chunk)) = work_rx.recv().await {
                    let transform = transform.clone();
                    let input_len = chunk.len();
                    let chunk_start = Instant::now();

                    let joined = tokio::task::spawn_blocking(move || transform(chunk)).await;
                    let outcome = match joined {
                        Ok(Ok(results)) => {
                            tracing::debug!(
                                "Chunk {} processed in {:?} ({} in, {} out)",
                                chunk_idx,
                                chunk_start.elapsed(),
                                input_len,
                                results.len()
                            );
                            Ok(results)
                        }
                        Ok(Err(e)) => {
                            tracing::warn!("Chunk {} failed: {}", chunk_idx, e);
                            Err(ChunkFailure::Failed(e))
                        }
                        Err(e) => {
                            tracing::warn!("Chunk {} task panicked: {}", chunk_idx, e);
                            Err(ChunkFailure::Panicked(e.to_string()))
                        }
                    };

                    completed.push((chunk_idx, outcome));
                }

                completed
            }));
        }

        // Fan in, keyed by chunk index
        let mut slots: Vec<Option<ChunkOutcome<R>>> = (0..total_chunks).map(|_| None).collect();
        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(completed) => {
                    for (chunk_idx, outcome) in completed {
                        slots[chunk_idx] = Some(outcome);
                    }
                }
                Err(e) => tracing::error!("Chunk worker exited abnormally: {}", e),
            }
        }

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for (chunk_idx, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(Ok(chunk_results)) => results.extend(chunk_results),
                Some(Err(failure)) => failures.push((chunk_idx, failure)),
                None => failures.push((
                    chunk_idx,
                    ChunkFailure::Panicked("worker exited before reporting".to_string()),
                )),
            }
        }

        tracing::debug!(
            "Executed {} chunks in {:?}: {} results, {} failed",
            total_chunks,
            start.elapsed(),
            results.len(),
            failures.len()
        );

        if failures.is_empty() {
            Ok(results)
        } else {
            Err(ChunkFailures {
                total_chunks,
                failures,
            })
        }
    }
}
