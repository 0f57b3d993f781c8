use std::fmt::Debug;

use silt_error::{Result, SiltError};

use crate::arrays::batch::Batch;
use crate::execution::operators::sort::merge::BatchMerger;
use crate::execution::operators::sort::sort_keys::{SortExpr, SortKeysExtractor};
use crate::execution::operators::sort::sorted_batch::IndexSortedBatch;

/// Accumulates batches and reads them back in globally sorted order.
///
/// A sorter alternates between an accepting phase and a reading phase.
/// `prepare_for_read` ends the accepting phase, after which batches are
/// pulled with `read_next_sorted` until exhausted. `reset` drops all state
/// and returns the sorter to accepting.
pub trait Sorter: Debug + Send {
    /// Accept a batch into the sort state.
    fn accept(&mut self, batch: Batch) -> Result<()>;

    /// Bytes of memory currently held by accepted data.
    fn current_size(&self) -> usize;

    /// Finish accepting and prepare to read data back in sorted order.
    fn prepare_for_read(&mut self) -> Result<()>;

    /// Read the next sorted batch of up to `max_rows` rows.
    ///
    /// The returned flag is true when nothing remains after this batch. An
    /// exhausted or empty sorter returns an empty batch with the flag set.
    fn read_next_sorted(&mut self, max_rows: usize) -> Result<(Batch, bool)>;

    /// Drop all state and return to accepting.
    fn reset(&mut self);
}

/// Sorter that keeps every accepted batch resident in memory.
///
/// Batches are index-sorted individually on accept, then k-way merged when
/// read back.
#[derive(Debug)]
pub struct InMemorySorter {
    extractor: SortKeysExtractor,
    batches: Vec<IndexSortedBatch>,
    merger: Option<BatchMerger>,
    size_bytes: usize,
}

impl InMemorySorter {
    pub fn new(exprs: &[SortExpr]) -> Self {
        InMemorySorter {
            extractor: SortKeysExtractor::new(exprs),
            batches: Vec::new(),
            merger: None,
            size_bytes: 0,
        }
    }
}

impl Sorter for InMemorySorter {
    fn accept(&mut self, batch: Batch) -> Result<()> {
        if self.merger.is_some() {
            return Err(SiltError::new(
                "Cannot accept batches while the sorter is being read",
            ));
        }
        if batch.num_rows() == 0 {
            return Ok(());
        }

        let keys = self.extractor.sort_keys(&batch)?;
        self.size_bytes += batch.data_size_bytes();
        self.batches.push(IndexSortedBatch::sort(batch, keys));
        Ok(())
    }

    fn current_size(&self) -> usize {
        self.size_bytes
    }

    fn prepare_for_read(&mut self) -> Result<()> {
        if self.merger.is_some() {
            return Err(SiltError::new("Sorter is already being read"));
        }
        let inputs = std::mem::take(&mut self.batches)
            .into_iter()
            .map(|batch| batch.into_batch_and_iter())
            .collect();
        self.merger = Some(BatchMerger::new(inputs));
        Ok(())
    }

    fn read_next_sorted(&mut self, max_rows: usize) -> Result<(Batch, bool)> {
        let merger = self
            .merger
            .as_mut()
            .ok_or_else(|| SiltError::new("Sorter is not prepared for reading"))?;

        match merger.next_batch(max_rows)? {
            Some(batch) => {
                let last = merger.is_exhausted();
                Ok((batch, last))
            }
            None => Ok((Batch::empty(), true)),
        }
    }

    fn reset(&mut self) {
        self.batches.clear();
        self.merger = None;
        self.size_bytes = 0;
    }
}
