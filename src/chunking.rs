//! Row chunking for the map step.
//!
//! A dataset is split into contiguous, non-overlapping row ranges of a fixed
//! size that together cover every row in order. The fixed row count stands in
//! for the model's input-token budget: 50 rows keeps a typical query result
//! well under 8k tokens, but very wide rows can still overflow it.

use std::ops::Range;

/// Rows per chunk when summarizing all results together.
pub const DEFAULT_CHUNK_ROWS: usize = 50;

/// Rows per chunk in per-row mode.
pub const PER_ROW_CHUNK_ROWS: usize = 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChunkingError {
    #[error("chunk size must be positive")]
    ZeroChunkSize,
}

/// Ordered partition of `0..total` into ranges of `chunk_size` rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    chunk_size: usize,
    ranges: Vec<Range<usize>>,
}

impl ChunkPlan {
    pub fn new(total: usize, chunk_size: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::ZeroChunkSize);
        }

        let ranges = (0..total)
            .step_by(chunk_size)
            .map(|start| start..(start + chunk_size).min(total))
            .collect();

        Ok(Self { chunk_size, ranges })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
