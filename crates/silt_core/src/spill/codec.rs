//! Byte encoding of batches for spill streams.
//!
//! Layout per batch: column count (u32), row count (u32), then each column
//! as a type tag (u8), a validity flag (u8) with packed validity bytes if
//! set, and the values. All integers are little endian. The framing around
//! batches (lengths, end of stream markers) is the stream's concern.

use bytes::{Buf, BufMut, BytesMut};
use silt_error::{Result, SiltError};

use crate::arrays::array::{
    Array,
    DataType,
    Float64Array,
    Int32Array,
    Int64Array,
    PrimitiveArray,
    UInt64Array,
    Utf8Array,
};
use crate::arrays::batch::Batch;
use crate::arrays::bitmap::Bitmap;

const TYPE_TAG_INT32: u8 = 0;
const TYPE_TAG_INT64: u8 = 1;
const TYPE_TAG_UINT64: u8 = 2;
const TYPE_TAG_FLOAT64: u8 = 3;
const TYPE_TAG_UTF8: u8 = 4;

pub fn encode_batch(batch: &Batch, buf: &mut BytesMut) {
    buf.put_u32_le(batch.num_columns() as u32);
    buf.put_u32_le(batch.num_rows() as u32);
    for col in batch.columns() {
        encode_array(col, buf);
    }
}

fn encode_array(array: &Array, buf: &mut BytesMut) {
    buf.put_u8(type_tag(array.datatype()));
    match array.validity() {
        Some(validity) => {
            buf.put_u8(1);
            buf.put_slice(validity.data());
        }
        None => buf.put_u8(0),
    }

    match array {
        Array::Int32(arr) => {
            for v in arr.values() {
                buf.put_i32_le(*v);
            }
        }
        Array::Int64(arr) => {
            for v in arr.values() {
                buf.put_i64_le(*v);
            }
        }
        Array::UInt64(arr) => {
            for v in arr.values() {
                buf.put_u64_le(*v);
            }
        }
        Array::Float64(arr) => {
            for v in arr.values() {
                buf.put_f64_le(*v);
            }
        }
        Array::Utf8(arr) => {
            buf.put_u64_le(arr.data().len() as u64);
            buf.put_slice(arr.data());
            for offset in arr.offsets() {
                buf.put_u64_le(*offset as u64);
            }
        }
    }
}

pub fn decode_batch(buf: &mut impl Buf) -> Result<Batch> {
    ensure_remaining(buf, 8)?;
    let num_columns = buf.get_u32_le() as usize;
    let num_rows = buf.get_u32_le() as usize;

    let cols = (0..num_columns)
        .map(|_| decode_array(buf, num_rows))
        .collect::<Result<Vec<_>>>()?;

    if cols.is_empty() {
        return Ok(Batch::empty_with_num_rows(num_rows));
    }
    let batch = Batch::try_new(cols)?;
    if batch.num_rows() != num_rows {
        return Err(SiltError::new("Decoded batch row count mismatch")
            .with_field("expected", num_rows)
            .with_field("got", batch.num_rows()));
    }
    Ok(batch)
}

fn decode_array(buf: &mut impl Buf, num_rows: usize) -> Result<Array> {
    ensure_remaining(buf, 2)?;
    let tag = buf.get_u8();
    let datatype = tag_datatype(tag)?;
    let validity = match buf.get_u8() {
        0 => None,
        1 => {
            let num_bytes = num_rows.div_ceil(8);
            ensure_remaining(buf, num_bytes)?;
            let mut data = vec![0; num_bytes];
            buf.copy_to_slice(&mut data);
            Some(Bitmap::try_from_packed(num_rows, data)?)
        }
        other => {
            return Err(
                SiltError::new("Invalid validity flag in spill data").with_field("flag", other)
            );
        }
    };

    match datatype {
        DataType::Int32 => {
            let values = decode_primitive_values(buf, num_rows, |buf| buf.get_i32_le())?;
            Ok(Array::Int32(with_validity(
                Int32Array::new(values),
                validity,
            )))
        }
        DataType::Int64 => {
            let values = decode_primitive_values(buf, num_rows, |buf| buf.get_i64_le())?;
            Ok(Array::Int64(with_validity(
                Int64Array::new(values),
                validity,
            )))
        }
        DataType::UInt64 => {
            let values = decode_primitive_values(buf, num_rows, |buf| buf.get_u64_le())?;
            Ok(Array::UInt64(with_validity(
                UInt64Array::new(values),
                validity,
            )))
        }
        DataType::Float64 => {
            let values = decode_primitive_values(buf, num_rows, |buf| buf.get_f64_le())?;
            Ok(Array::Float64(with_validity(
                Float64Array::new(values),
                validity,
            )))
        }
        DataType::Utf8 => {
            ensure_remaining(buf, 8)?;
            let data_len = buf.get_u64_le() as usize;
            ensure_remaining(buf, data_len)?;
            let mut data = vec![0; data_len];
            buf.copy_to_slice(&mut data);

            let num_offsets = num_rows + 1;
            ensure_remaining(buf, num_offsets * 8)?;
            let mut offsets = Vec::with_capacity(num_offsets);
            for _ in 0..num_offsets {
                offsets.push(buf.get_u64_le() as usize);
            }

            let arr = Utf8Array::try_from_parts(offsets, data, validity)?;
            Ok(Array::Utf8(arr))
        }
    }
}

fn decode_primitive_values<B: Buf, T>(
    buf: &mut B,
    num_rows: usize,
    get: impl Fn(&mut B) -> T,
) -> Result<Vec<T>> {
    ensure_remaining(buf, num_rows * std::mem::size_of::<T>())?;
    let mut values = Vec::with_capacity(num_rows);
    for _ in 0..num_rows {
        values.push(get(buf));
    }
    Ok(values)
}

fn with_validity<T>(mut arr: PrimitiveArray<T>, validity: Option<Bitmap>) -> PrimitiveArray<T> {
    if let Some(validity) = validity {
        arr.put_validity(validity);
    }
    arr
}

fn type_tag(datatype: DataType) -> u8 {
    match datatype {
        DataType::Int32 => TYPE_TAG_INT32,
        DataType::Int64 => TYPE_TAG_INT64,
        DataType::UInt64 => TYPE_TAG_UINT64,
        DataType::Float64 => TYPE_TAG_FLOAT64,
        DataType::Utf8 => TYPE_TAG_UTF8,
    }
}

fn tag_datatype(tag: u8) -> Result<DataType> {
    match tag {
        TYPE_TAG_INT32 => Ok(DataType::Int32),
        TYPE_TAG_INT64 => Ok(DataType::Int64),
        TYPE_TAG_UINT64 => Ok(DataType::UInt64),
        TYPE_TAG_FLOAT64 => Ok(DataType::Float64),
        TYPE_TAG_UTF8 => Ok(DataType::Utf8),
        other => Err(SiltError::new("Unknown type tag in spill data").with_field("tag", other)),
    }
}

fn ensure_remaining(buf: &impl Buf, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(SiltError::new("Unexpected end of spill data")
            .with_field("needed", needed)
            .with_field("remaining", buf.remaining()));
    }
    Ok(())
}
