use crate::arrays::array::{Array, Int64Array};
use crate::arrays::batch::Batch;
use crate::execution::operators::sort::sort_keys::SortExpr;

/// Single ascending sort key on column 0, the common case in tests.
pub fn asc_keys_on_first_column() -> Vec<SortExpr> {
    vec![SortExpr {
        column: 0,
        desc: false,
        nulls_first: false,
    }]
}

pub fn make_i64_batch(values: impl IntoIterator<Item = i64>) -> Batch {
    Batch::try_new([Array::Int64(Int64Array::from_iter(values))]).unwrap()
}

pub fn collect_i64_column(batch: &Batch, col: usize) -> Vec<i64> {
    match batch.column(col).unwrap() {
        Array::Int64(arr) => arr.values().to_vec(),
        other => panic!("unexpected array type: {:?}", other.datatype()),
    }
}
