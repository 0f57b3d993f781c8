use silt_error::{Result, SiltError};

use crate::arrays::batch::Batch;
use crate::arrays::row_encoding::{SortColumn, SortKeyEncoder, SortKeys};

/// A single sort key for the sort operator: which input column to sort by
/// and how.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortExpr {
    pub column: usize,
    pub desc: bool,
    pub nulls_first: bool,
}

/// Extracts byte-comparable sort keys from input batches.
#[derive(Debug, Clone)]
pub struct SortKeysExtractor {
    columns: Vec<usize>,
    encoder: SortKeyEncoder,
}

impl SortKeysExtractor {
    pub fn new(exprs: &[SortExpr]) -> Self {
        let columns = exprs.iter().map(|expr| expr.column).collect();
        let encoder = SortKeyEncoder {
            columns: exprs
                .iter()
                .map(|expr| SortColumn {
                    desc: expr.desc,
                    nulls_first: expr.nulls_first,
                })
                .collect(),
        };
        SortKeysExtractor { columns, encoder }
    }

    /// Get the sort keys for the batch as rows.
    pub fn sort_keys(&self, batch: &Batch) -> Result<SortKeys> {
        let arrays = self
            .columns
            .iter()
            .map(|idx| {
                batch.column(*idx).ok_or_else(|| {
                    SiltError::new("Sort column out of bounds")
                        .with_field("column", *idx)
                        .with_field("batch_columns", batch.num_columns())
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.encoder.encode(&arrays)
    }
}
