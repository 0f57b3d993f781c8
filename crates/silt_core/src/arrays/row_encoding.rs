use silt_error::{Result, SiltError};

use crate::arrays::array::{Array, PrimitiveArray, Utf8Array};

/// Byte-comparable row encodings of sort key columns.
///
/// Comparing the encoded bytes of two rows produces the same ordering as
/// comparing the underlying values column by column, letting the sort work
/// on plain memcmp instead of type-dispatched comparators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKeys {
    /// Encoded rows stored back to back.
    data: Vec<u8>,
    /// Offsets into data, with the last offset indicating the end of the
    /// last row. Length is num_rows + 1.
    offsets: Vec<usize>,
}

impl SortKeys {
    pub fn num_rows(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.num_rows() == 0
    }

    pub fn row(&self, idx: usize) -> Option<SortKeyRef<'_>> {
        if idx >= self.num_rows() {
            return None;
        }
        Some(SortKeyRef {
            data: &self.data[self.offsets[idx]..self.offsets[idx + 1]],
        })
    }

    pub fn iter(&self) -> SortKeysIter<'_> {
        SortKeysIter { keys: self, idx: 0 }
    }
}

/// Encoded key bytes for a single row. Ordering on the raw bytes matches
/// the sort order the keys were encoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKeyRef<'a> {
    data: &'a [u8],
}

impl<'a> SortKeyRef<'a> {
    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

#[derive(Debug)]
pub struct SortKeysIter<'a> {
    keys: &'a SortKeys,
    idx: usize,
}

impl<'a> Iterator for SortKeysIter<'a> {
    type Item = SortKeyRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let row = self.keys.row(self.idx)?;
        self.idx += 1;
        Some(row)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.keys.num_rows() - self.idx;
        (remaining, Some(remaining))
    }
}

/// Ordering options for a single sort key column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortColumn {
    /// Sort the column descending.
    pub desc: bool,
    /// Order nulls before all valid values instead of after.
    pub nulls_first: bool,
}

impl SortColumn {
    /// Byte prefix for a null value in this column.
    const fn null_bit(&self) -> u8 {
        if self.nulls_first { 0 } else { u8::MAX }
    }

    /// Byte prefix for a valid value in this column.
    const fn valid_bit(&self) -> u8 {
        if self.nulls_first { 1 } else { 0 }
    }

    /// Invert the encoded value bytes if this column sorts descending.
    fn invert_if_desc(&self, buf: &mut [u8]) {
        if self.desc {
            for b in buf.iter_mut() {
                *b = !*b;
            }
        }
    }
}

/// Encodes sort key columns into byte-comparable rows.
#[derive(Debug, Clone)]
pub struct SortKeyEncoder {
    pub columns: Vec<SortColumn>,
}

impl SortKeyEncoder {
    /// Encode columns into rows.
    ///
    /// All columns must be of the same length, and the number of columns
    /// must match the sort columns this encoder was created with.
    pub fn encode(&self, columns: &[&Array]) -> Result<SortKeys> {
        if columns.len() != self.columns.len() {
            return Err(SiltError::new("Column count mismatch for sort key encoding")
                .with_field("expected", self.columns.len())
                .with_field("got", columns.len()));
        }
        let num_rows = columns.first().map(|c| c.len()).unwrap_or(0);
        for col in columns {
            if col.len() != num_rows {
                return Err(SiltError::new("Sort key column length mismatch")
                    .with_field("expected", num_rows)
                    .with_field("got", col.len()));
            }
        }

        let mut data = vec![0; self.compute_data_size(columns)];
        let mut offsets = Vec::with_capacity(num_rows + 1);
        offsets.push(0);

        let mut offset = 0;
        for row in 0..num_rows {
            for (arr, sort_col) in columns.iter().zip(&self.columns) {
                offset = match arr {
                    Array::Int32(arr) => Self::encode_primitive(sort_col, arr, row, &mut data, offset),
                    Array::Int64(arr) => Self::encode_primitive(sort_col, arr, row, &mut data, offset),
                    Array::UInt64(arr) => Self::encode_primitive(sort_col, arr, row, &mut data, offset),
                    Array::Float64(arr) => Self::encode_primitive(sort_col, arr, row, &mut data, offset),
                    Array::Utf8(arr) => Self::encode_varlen(sort_col, arr, row, &mut data, offset),
                };
            }
            offsets.push(offset);
        }
        // Null varlen rows may reserve more than they write.
        data.truncate(offset);

        Ok(SortKeys { data, offsets })
    }

    /// Upper bound on the encoded size of all rows, one validity byte per
    /// row per column plus the value bytes.
    fn compute_data_size(&self, columns: &[&Array]) -> usize {
        let mut size = 0;
        for arr in columns {
            size += match arr {
                Array::Int32(arr) => arr.len() * std::mem::size_of::<i32>(),
                Array::Int64(arr) => arr.len() * std::mem::size_of::<i64>(),
                Array::UInt64(arr) => arr.len() * std::mem::size_of::<u64>(),
                Array::Float64(arr) => arr.len() * std::mem::size_of::<f64>(),
                Array::Utf8(arr) => arr.data().len(),
            };
            size += arr.len();
        }
        size
    }

    fn encode_primitive<T: KeyEncode + Copy>(
        sort_col: &SortColumn,
        arr: &PrimitiveArray<T>,
        row: usize,
        buf: &mut [u8],
        start: usize,
    ) -> usize {
        let valid = arr.is_valid(row).expect("row to be in bounds");
        let value_start = start + 1;
        let value_end = value_start + std::mem::size_of::<T>();
        if valid {
            buf[start] = sort_col.valid_bit();
            let value = arr.value(row).expect("row to be in bounds");
            value.encode(&mut buf[value_start..value_end]);
            sort_col.invert_if_desc(&mut buf[value_start..value_end]);
        } else {
            // Keep the zeroed value bytes so rows in this column stay fixed
            // width.
            buf[start] = sort_col.null_bit();
        }
        value_end
    }

    fn encode_varlen(
        sort_col: &SortColumn,
        arr: &Utf8Array,
        row: usize,
        buf: &mut [u8],
        start: usize,
    ) -> usize {
        let valid = arr.is_valid(row).expect("row to be in bounds");
        let mut end = start + 1;
        if valid {
            buf[start] = sort_col.valid_bit();
            let value = arr.value(row).expect("row to be in bounds");
            let value_end = end + value.len();
            buf[end..value_end].copy_from_slice(value.as_bytes());
            sort_col.invert_if_desc(&mut buf[end..value_end]);
            end = value_end;
        } else {
            buf[start] = sort_col.null_bit();
        }
        end
    }
}

/// Encode a value into a fixed-size buffer such that byte-wise comparison
/// of encoded values matches the ordering of the original values.
trait KeyEncode {
    fn encode(&self, buf: &mut [u8]);
}

macro_rules! key_encode_unsigned {
    ($($type:ty),*) => {
        $(
            impl KeyEncode for $type {
                fn encode(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_be_bytes());
                }
            }
        )*
    };
}

key_encode_unsigned!(u8, u16, u32, u64);

macro_rules! key_encode_signed {
    ($($type:ty),*) => {
        $(
            impl KeyEncode for $type {
                fn encode(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_be_bytes());
                    // Flip the sign bit so negatives order before positives.
                    buf[0] ^= 128;
                }
            }
        )*
    };
}

key_encode_signed!(i8, i16, i32, i64);

impl KeyEncode for f64 {
    fn encode(&self, buf: &mut [u8]) {
        let bits = self.to_bits() as i64;
        let v = bits ^ (((bits >> 63) as u64) >> 1) as i64;
        v.encode(buf)
    }
}
