use std::num::NonZeroUsize;

use crate::ingest::reader::{Row, RowGroup};

/// Ordered, bounded group of rows written in one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Ordinal of this batch within the run, starting at 0.
    pub index: u64,
    /// Data-row offset of `rows[0]`.
    pub first_row: u64,
    /// Rows in file order; never empty, never longer than the chunk size.
    pub rows: Vec<Row>,
}

impl Batch {
    /// Rows in this batch.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Always false for batches produced by [`partition`].
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Data-row offset one past the last row.
    pub fn end_row(&self) -> u64 {
        self.first_row + self.rows.len() as u64
    }

    /// Last row of the batch.
    pub fn last_row(&self) -> Option<&Row> {
        self.rows.last()
    }
}

/// Where the next batch starts: its ordinal and its data-row offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchPosition {
    /// Ordinal assigned to the next batch.
    pub index: u64,
    /// Data-row offset of the next batch's first row.
    pub first_row: u64,
}

impl BatchPosition {
    /// Position at the given data-row offset, batch ordinal 0.
    pub fn at_row(first_row: u64) -> Self {
        Self { index: 0, first_row }
    }
}

/// Splits `rows` into `ceil(len / chunk_size)` order-preserving batches.
pub fn partition(rows: Vec<Row>, chunk_size: NonZeroUsize) -> Vec<Batch> {
    partition_from(rows, chunk_size, BatchPosition::default()).0
}

/// Like [`partition`], numbering batches from `start`. Returns the batches and
/// the position following the last one, to be threaded into the next call.
pub fn partition_from(
    rows: Vec<Row>,
    chunk_size: NonZeroUsize,
    start: BatchPosition,
) -> (Vec<Batch>, BatchPosition) {
    let chunk = chunk_size.get();
    let mut batches = Vec::with_capacity(rows.len().div_ceil(chunk));
    let mut next = start;
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        let batch_rows: Vec<Row> = rows.by_ref().take(chunk).collect();
        let batch = Batch {
            index: next.index,
            first_row: next.first_row,
            rows: batch_rows,
        };
        next = BatchPosition {
            index: next.index + 1,
            first_row: batch.end_row(),
        };
        batches.push(batch);
    }
    (batches, next)
}

/// Partitions one row group, continuing the numbering at `next`.
pub fn partition_group(
    group: RowGroup,
    chunk_size: NonZeroUsize,
    next: BatchPosition,
) -> (Vec<Batch>, BatchPosition) {
    debug_assert_eq!(group.first_row, next.first_row, "row groups must be contiguous");
    partition_from(group.rows, chunk_size, next)
}
