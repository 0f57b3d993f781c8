use silt_error::{Result, SiltError};

use crate::arrays::array::Array;

/// A batch of rows represented as equal-length columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    cols: Vec<Array>,
    num_rows: usize,
}

impl Batch {
    pub const fn empty() -> Self {
        Batch {
            cols: Vec::new(),
            num_rows: 0,
        }
    }

    pub fn empty_with_num_rows(num_rows: usize) -> Self {
        Batch {
            cols: Vec::new(),
            num_rows,
        }
    }

    /// Create a new batch from some columns, erroring if column lengths
    /// differ.
    pub fn try_new(cols: impl IntoIterator<Item = Array>) -> Result<Self> {
        let cols: Vec<_> = cols.into_iter().collect();
        let len = match cols.first() {
            Some(arr) => arr.len(),
            None => return Ok(Self::empty()),
        };

        for (idx, col) in cols.iter().enumerate() {
            if col.len() != len {
                return Err(SiltError::new(format!(
                    "Expected column length to be {len}, got {}. Column idx: {idx}",
                    col.len()
                )));
            }
        }

        Ok(Batch {
            cols,
            num_rows: len,
        })
    }

    pub fn column(&self, idx: usize) -> Option<&Array> {
        self.cols.get(idx)
    }

    pub fn columns(&self) -> &[Array] {
        &self.cols
    }

    pub fn num_columns(&self) -> usize {
        self.cols.len()
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Approximate in-memory size of the batch data in bytes.
    pub fn data_size_bytes(&self) -> usize {
        self.cols.iter().map(|c| c.data_size_bytes()).sum()
    }

    pub fn into_arrays(self) -> Vec<Array> {
        self.cols
    }
}
