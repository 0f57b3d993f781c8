use silt_error::{Result, SiltError};

use crate::arrays::array::{Array, DataType, PrimitiveArray, Utf8Array};
use crate::arrays::batch::Batch;
use crate::arrays::bitmap::Bitmap;

/// Collect `&Array` references into references of a concrete array type,
/// erroring if any array is of a different type.
macro_rules! collect_arrays_of_type {
    ($arrays:expr, $variant:ident) => {{
        $arrays
            .iter()
            .map(|arr| match arr {
                Array::$variant(arr) => Ok(arr),
                other => Err(SiltError::new(format!(
                    "Array type mismatch, expected {}, got {:?}",
                    stringify!($variant),
                    other.datatype()
                ))),
            })
            .collect::<Result<Vec<_>>>()
    }};
}

/// Interleave multiple arrays into one.
///
/// Indices are (array, row) pairs determining the source of each output row.
pub fn interleave(arrays: &[&Array], indices: &[(usize, usize)]) -> Result<Array> {
    let datatype = match arrays.first() {
        Some(arr) => arr.datatype(),
        None => return Err(SiltError::new("Cannot interleave zero arrays")),
    };

    match datatype {
        DataType::Int32 => {
            let arrs = collect_arrays_of_type!(arrays, Int32)?;
            Ok(Array::Int32(interleave_primitive(&arrs, indices)))
        }
        DataType::Int64 => {
            let arrs = collect_arrays_of_type!(arrays, Int64)?;
            Ok(Array::Int64(interleave_primitive(&arrs, indices)))
        }
        DataType::UInt64 => {
            let arrs = collect_arrays_of_type!(arrays, UInt64)?;
            Ok(Array::UInt64(interleave_primitive(&arrs, indices)))
        }
        DataType::Float64 => {
            let arrs = collect_arrays_of_type!(arrays, Float64)?;
            Ok(Array::Float64(interleave_primitive(&arrs, indices)))
        }
        DataType::Utf8 => {
            let arrs = collect_arrays_of_type!(arrays, Utf8)?;
            Ok(Array::Utf8(interleave_varlen(&arrs, indices)))
        }
    }
}

fn interleave_primitive<T: Copy>(
    arrays: &[&PrimitiveArray<T>],
    indices: &[(usize, usize)],
) -> PrimitiveArray<T> {
    let mut values = Vec::with_capacity(indices.len());
    for (arr_idx, row_idx) in indices {
        let value = arrays[*arr_idx].value(*row_idx).expect("row to exist");
        values.push(*value);
    }

    let mut arr = PrimitiveArray::new(values);
    let validities: Vec<_> = arrays.iter().map(|a| a.validity()).collect();
    if let Some(validity) = interleave_validities(&validities, indices) {
        arr.put_validity(validity);
    }
    arr
}

fn interleave_varlen(arrays: &[&Utf8Array], indices: &[(usize, usize)]) -> Utf8Array {
    let mut arr: Utf8Array = indices
        .iter()
        .map(|(arr_idx, row_idx)| arrays[*arr_idx].value(*row_idx).expect("row to exist"))
        .collect();

    let validities: Vec<_> = arrays.iter().map(|a| a.validity()).collect();
    if let Some(validity) = interleave_validities(&validities, indices) {
        arr.put_validity(validity);
    }
    arr
}

fn interleave_validities(
    validities: &[Option<&Bitmap>],
    indices: &[(usize, usize)],
) -> Option<Bitmap> {
    if validities.iter().all(|v| v.is_none()) {
        return None;
    }

    let validity = indices
        .iter()
        .map(|(arr_idx, row_idx)| match validities[*arr_idx] {
            Some(validity) => validity.value(*row_idx),
            None => true,
        })
        .collect();
    Some(validity)
}

/// Interleave columns across multiple batches into a single batch.
///
/// Indices are (batch, row) pairs. All batches must have the same number of
/// columns.
pub fn interleave_batches(batches: &[Batch], indices: &[(usize, usize)]) -> Result<Batch> {
    let num_columns = match batches.first() {
        Some(batch) => batch.num_columns(),
        None => return Err(SiltError::new("Cannot interleave zero batches")),
    };
    for batch in batches {
        if batch.num_columns() != num_columns {
            return Err(SiltError::new("Batch column count mismatch")
                .with_field("expected", num_columns)
                .with_field("got", batch.num_columns()));
        }
    }

    let mut cols = Vec::with_capacity(num_columns);
    for col_idx in 0..num_columns {
        let arrays: Vec<_> = batches
            .iter()
            .map(|batch| batch.column(col_idx).expect("column to exist"))
            .collect();
        cols.push(interleave(&arrays, indices)?);
    }

    Batch::try_new(cols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arrays::array::{Int32Array, Int64Array};

    #[test]
    fn interleave_two_arrays() {
        let a = Array::Int32(Int32Array::from_iter([1, 3, 5]));
        let b = Array::Int32(Int32Array::from_iter([2, 4, 6]));

        let out = interleave(&[&a, &b], &[(0, 0), (1, 0), (0, 1), (1, 1)]).unwrap();
        let expected = Array::Int32(Int32Array::from_iter([1, 2, 3, 4]));
        assert_eq!(expected, out);
    }

    #[test]
    fn interleave_type_mismatch() {
        let a = Array::Int32(Int32Array::from_iter([1]));
        let b = Array::Int64(Int64Array::from_iter([2]));
        interleave(&[&a, &b], &[(0, 0), (1, 0)]).unwrap_err();
    }

    #[test]
    fn interleave_with_validities() {
        let a = Array::Int32(Int32Array::from_iter([Some(1), None]));
        let b = Array::Int32(Int32Array::from_iter([3, 4]));

        let out = interleave(&[&a, &b], &[(1, 1), (0, 1), (0, 0)]).unwrap();
        let expected = Array::Int32(Int32Array::from_iter([Some(4), None, Some(1)]));
        assert_eq!(expected, out);
    }

    #[test]
    fn interleave_varlen_arrays() {
        let a = Array::Utf8(Utf8Array::from_iter(["a", "ccc"]));
        let b = Array::Utf8(Utf8Array::from_iter(["bb"]));

        let out = interleave(&[&a, &b], &[(0, 0), (1, 0), (0, 1)]).unwrap();
        let expected = Array::Utf8(Utf8Array::from_iter(["a", "bb", "ccc"]));
        assert_eq!(expected, out);
    }

    #[test]
    fn interleave_batches_simple() {
        let first = Batch::try_new([
            Array::Int32(Int32Array::from_iter([1, 3])),
            Array::Utf8(Utf8Array::from_iter(["one", "three"])),
        ])
        .unwrap();
        let second = Batch::try_new([
            Array::Int32(Int32Array::from_iter([2, 4])),
            Array::Utf8(Utf8Array::from_iter(["two", "four"])),
        ])
        .unwrap();

        let out = interleave_batches(&[first, second], &[(0, 0), (1, 0), (0, 1), (1, 1)]).unwrap();
        let expected = Batch::try_new([
            Array::Int32(Int32Array::from_iter([1, 2, 3, 4])),
            Array::Utf8(Utf8Array::from_iter(["one", "two", "three", "four"])),
        ])
        .unwrap();
        assert_eq!(expected, out);
    }

    #[test]
    fn interleave_batches_column_mismatch() {
        let first = Batch::try_new([Array::Int32(Int32Array::from_iter([1]))]).unwrap();
        let second = Batch::try_new([
            Array::Int32(Int32Array::from_iter([2])),
            Array::Int32(Int32Array::from_iter([3])),
        ])
        .unwrap();
        interleave_batches(&[first, second], &[(0, 0)]).unwrap_err();
    }
}
