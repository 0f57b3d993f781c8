use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use silt_error::Result;

use crate::arrays::batch::Batch;
use crate::arrays::interleave::interleave_batches;
use crate::execution::operators::sort::sorted_batch::{RowReference, SortedIndicesIter};

/// K-way merge of index-sorted batches.
///
/// All inputs must be provided up front. The merger walks the inputs
/// through a min-heap of row references, producing output batches of a
/// requested size until every input is exhausted.
#[derive(Debug)]
pub struct BatchMerger {
    batches: Vec<Batch>,
    iters: Vec<SortedIndicesIter>,
    heap: BinaryHeap<Reverse<HeapEntry>>,
}

#[derive(Debug)]
struct HeapEntry {
    row: RowReference,
    input: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Ties between inputs resolve by input index to keep the merge
        // deterministic.
        self.row
            .cmp(&other.row)
            .then_with(|| self.input.cmp(&other.input))
    }
}

impl BatchMerger {
    pub fn new(inputs: Vec<(Batch, SortedIndicesIter)>) -> Self {
        let mut batches = Vec::with_capacity(inputs.len());
        let mut iters = Vec::with_capacity(inputs.len());
        let mut heap = BinaryHeap::with_capacity(inputs.len());

        for (input, (batch, mut iter)) in inputs.into_iter().enumerate() {
            if let Some(row) = iter.next() {
                heap.push(Reverse(HeapEntry { row, input }));
            }
            batches.push(batch);
            iters.push(iter);
        }

        BatchMerger {
            batches,
            iters,
            heap,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.heap.is_empty()
    }

    /// Produce the next merged batch with up to `max_rows` rows. Returns
    /// None once all inputs are exhausted.
    pub fn next_batch(&mut self, max_rows: usize) -> Result<Option<Batch>> {
        if self.heap.is_empty() || max_rows == 0 {
            return Ok(None);
        }

        let mut indices = Vec::with_capacity(max_rows);
        while indices.len() < max_rows {
            let Reverse(entry) = match self.heap.pop() {
                Some(entry) => entry,
                None => break,
            };
            indices.push((entry.input, entry.row.row_idx()));

            if let Some(row) = self.iters[entry.input].next() {
                self.heap.push(Reverse(HeapEntry {
                    row,
                    input: entry.input,
                }));
            }
        }

        let batch = interleave_batches(&self.batches, &indices)?;
        Ok(Some(batch))
    }
}
