//! Splitting a batch into fixed-size contiguous chunks.

use crate::error::IngestError;

/// Split `items` into contiguous chunks of `chunk_size`, the last chunk
/// holding the remainder. Chunk order matches input order.
pub fn partition<T>(items: Vec<T>, chunk_size: usize) -> Result<Vec<Vec<T>>, IngestError> {
    if chunk_size == 0 {
        return Err(IngestError::InvalidArgument(
            "chunk size must be positive".to_string(),
        ));
    }

    let mut chunks = Vec::with_capacity(items.len().div_ceil(chunk_size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(chunk_size).collect());
    }
    Ok(chunks)
}
