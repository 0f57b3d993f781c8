use std::fmt;
use std::sync::Arc;

use crate::arrays::batch::Batch;
use crate::arrays::row_encoding::{SortKeyRef, SortKeys};

/// A batch with its rows sorted indirectly through a row index.
///
/// The batch itself is left in its original order. Sortedness lives in
/// `sort_indices`, the row indices in key order.
#[derive(Debug)]
pub struct IndexSortedBatch {
    /// Indices of rows in sort order.
    sort_indices: Vec<usize>,
    /// Unsorted keys for the batch.
    keys: SortKeys,
    /// The original unsorted batch.
    batch: Batch,
}

impl IndexSortedBatch {
    /// Sort the batch's rows by the given keys.
    pub fn sort(batch: Batch, keys: SortKeys) -> Self {
        debug_assert_eq!(batch.num_rows(), keys.num_rows());

        let mut sort_indices: Vec<_> = (0..batch.num_rows()).collect();
        sort_indices.sort_by_key(|idx| keys.row(*idx).expect("row to exist"));

        IndexSortedBatch {
            sort_indices,
            keys,
            batch,
        }
    }

    pub fn into_batch_and_iter(self) -> (Batch, SortedIndicesIter) {
        let iter = SortedIndicesIter {
            sort_indices: self.sort_indices,
            keys: Arc::new(self.keys),
            idx: 0,
        };
        (self.batch, iter)
    }
}

/// Iterator over a sorted batch's row references in key order.
#[derive(Debug)]
pub struct SortedIndicesIter {
    sort_indices: Vec<usize>,
    keys: Arc<SortKeys>,
    idx: usize,
}

impl Iterator for SortedIndicesIter {
    type Item = RowReference;

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.sort_indices.len() {
            return None;
        }
        let row_idx = self.sort_indices[self.idx];
        self.idx += 1;
        Some(RowReference {
            rows: self.keys.clone(),
            row_idx,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.sort_indices.len() - self.idx;
        (remaining, Some(remaining))
    }
}

/// A reference to a row in a sorted batch.
///
/// `Eq` and `Ord` compare only the row's key bytes and not where the row
/// lives, letting references from different batches be merged in a heap.
#[derive(Clone)]
pub struct RowReference {
    rows: Arc<SortKeys>,
    row_idx: usize,
}

impl RowReference {
    pub fn row_idx(&self) -> usize {
        self.row_idx
    }

    fn key(&self) -> SortKeyRef<'_> {
        self.rows.row(self.row_idx).expect("row to exist")
    }
}

impl PartialEq for RowReference {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for RowReference {}

impl PartialOrd for RowReference {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RowReference {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Debug for RowReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowReference")
            .field("row_idx", &self.row_idx)
            .finish_non_exhaustive()
    }
}
