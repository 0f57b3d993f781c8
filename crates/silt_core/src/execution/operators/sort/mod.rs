//! Sorting with support for spilling sorted runs to external storage.

pub mod merge;
pub mod sort_keys;
pub mod sorted_batch;
pub mod sorter;
pub mod spill_sink;

#[cfg(test)]
mod test_util;
