use std::str;

use silt_error::{Result, SiltError};

use crate::arrays::bitmap::Bitmap;

/// Logical type of an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int32,
    Int64,
    UInt64,
    Float64,
    Utf8,
}

pub type Int32Array = PrimitiveArray<i32>;
pub type Int64Array = PrimitiveArray<i64>;
pub type UInt64Array = PrimitiveArray<u64>;
pub type Float64Array = PrimitiveArray<f64>;

/// Array of fixed-width values with optional validity.
///
/// Rows that are not valid still store a value (typically the type's
/// default) so that positional access never fails.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveArray<T> {
    /// Validity of the values. If None, all values are considered valid.
    validity: Option<Bitmap>,
    values: Vec<T>,
}

impl<T> PrimitiveArray<T> {
    pub fn new(values: Vec<T>) -> Self {
        PrimitiveArray {
            validity: None,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a reference to the value at `idx`, independent of validity.
    pub fn value(&self, idx: usize) -> Option<&T> {
        self.values.get(idx)
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn is_valid(&self, idx: usize) -> Option<bool> {
        if idx >= self.len() {
            return None;
        }
        Some(match &self.validity {
            Some(validity) => validity.value(idx),
            None => true,
        })
    }

    pub fn validity(&self) -> Option<&Bitmap> {
        self.validity.as_ref()
    }

    /// Attach a validity bitmap to the array.
    ///
    /// Panics if the bitmap length does not match the array length.
    pub fn put_validity(&mut self, validity: Bitmap) {
        assert_eq!(
            self.values.len(),
            validity.len(),
            "validity length must match array length"
        );
        self.validity = Some(validity);
    }
}

impl<T> FromIterator<T> for PrimitiveArray<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        PrimitiveArray {
            validity: None,
            values: iter.into_iter().collect(),
        }
    }
}

impl<T: Default> FromIterator<Option<T>> for PrimitiveArray<T> {
    fn from_iter<I: IntoIterator<Item = Option<T>>>(iter: I) -> Self {
        let mut validity = Bitmap::default();
        let mut values = Vec::new();
        for item in iter {
            match item {
                Some(value) => {
                    validity.push(true);
                    values.push(value);
                }
                None => {
                    validity.push(false);
                    values.push(T::default());
                }
            }
        }
        let mut arr = PrimitiveArray::new(values);
        if !validity.is_all_true() {
            arr.put_validity(validity);
        }
        arr
    }
}

/// Variable-length UTF-8 array.
///
/// Values are stored back to back in a single buffer with offsets marking
/// the value boundaries. An array of n values has n+1 offsets.
#[derive(Debug, Clone, PartialEq)]
pub struct Utf8Array {
    validity: Option<Bitmap>,
    offsets: Vec<usize>,
    data: Vec<u8>,
}

impl Utf8Array {
    /// Create an array from parts, validating offsets and that the buffer
    /// holds valid UTF-8 at each value boundary.
    pub fn try_from_parts(
        offsets: Vec<usize>,
        data: Vec<u8>,
        validity: Option<Bitmap>,
    ) -> Result<Self> {
        if offsets.is_empty() {
            return Err(SiltError::new("Offsets buffer must not be empty"));
        }
        if offsets[0] != 0 {
            return Err(SiltError::new("First offset must be zero").with_field("got", offsets[0]));
        }
        if *offsets.last().unwrap_or(&0) != data.len() {
            return Err(SiltError::new("Last offset does not match data length")
                .with_field("offset", *offsets.last().unwrap_or(&0))
                .with_field("data_len", data.len()));
        }
        for win in offsets.windows(2) {
            if win[1] < win[0] {
                return Err(SiltError::new("Offsets must be non-decreasing"));
            }
            if win[1] > data.len() {
                return Err(SiltError::new("Offset past end of data")
                    .with_field("offset", win[1])
                    .with_field("data_len", data.len()));
            }
            let _ = str::from_utf8(&data[win[0]..win[1]])?;
        }

        let mut arr = Utf8Array {
            validity: None,
            offsets,
            data,
        };
        if let Some(validity) = validity {
            if validity.len() != arr.len() {
                return Err(SiltError::new("Validity length does not match array length")
                    .with_field("validity", validity.len())
                    .with_field("len", arr.len()));
            }
            arr.validity = Some(validity);
        }
        Ok(arr)
    }

    pub fn len(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the value at `idx`, independent of validity.
    pub fn value(&self, idx: usize) -> Option<&str> {
        if idx >= self.len() {
            return None;
        }
        let bytes = &self.data[self.offsets[idx]..self.offsets[idx + 1]];
        // Construction validates all value boundaries.
        Some(str::from_utf8(bytes).expect("stored bytes to be valid utf8"))
    }

    pub fn is_valid(&self, idx: usize) -> Option<bool> {
        if idx >= self.len() {
            return None;
        }
        Some(match &self.validity {
            Some(validity) => validity.value(idx),
            None => true,
        })
    }

    pub fn validity(&self) -> Option<&Bitmap> {
        self.validity.as_ref()
    }

    pub fn put_validity(&mut self, validity: Bitmap) {
        assert_eq!(
            self.len(),
            validity.len(),
            "validity length must match array length"
        );
        self.validity = Some(validity);
    }

    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Default for Utf8Array {
    fn default() -> Self {
        Utf8Array {
            validity: None,
            offsets: vec![0],
            data: Vec::new(),
        }
    }
}

impl<'a> FromIterator<&'a str> for Utf8Array {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut arr = Utf8Array::default();
        for value in iter {
            arr.data.extend_from_slice(value.as_bytes());
            arr.offsets.push(arr.data.len());
        }
        arr
    }
}

impl<'a> FromIterator<Option<&'a str>> for Utf8Array {
    fn from_iter<I: IntoIterator<Item = Option<&'a str>>>(iter: I) -> Self {
        let mut arr = Utf8Array::default();
        let mut validity = Bitmap::default();
        for item in iter {
            if let Some(value) = item {
                arr.data.extend_from_slice(value.as_bytes());
                validity.push(true);
            } else {
                validity.push(false);
            }
            arr.offsets.push(arr.data.len());
        }
        if !validity.is_all_true() {
            arr.put_validity(validity);
        }
        arr
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Array {
    Int32(Int32Array),
    Int64(Int64Array),
    UInt64(UInt64Array),
    Float64(Float64Array),
    Utf8(Utf8Array),
}

impl Array {
    pub fn datatype(&self) -> DataType {
        match self {
            Array::Int32(_) => DataType::Int32,
            Array::Int64(_) => DataType::Int64,
            Array::UInt64(_) => DataType::UInt64,
            Array::Float64(_) => DataType::Float64,
            Array::Utf8(_) => DataType::Utf8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Array::Int32(arr) => arr.len(),
            Array::Int64(arr) => arr.len(),
            Array::UInt64(arr) => arr.len(),
            Array::Float64(arr) => arr.len(),
            Array::Utf8(arr) => arr.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn validity(&self) -> Option<&Bitmap> {
        match self {
            Array::Int32(arr) => arr.validity(),
            Array::Int64(arr) => arr.validity(),
            Array::UInt64(arr) => arr.validity(),
            Array::Float64(arr) => arr.validity(),
            Array::Utf8(arr) => arr.validity(),
        }
    }

    /// Approximate in-memory size of the array data in bytes.
    pub fn data_size_bytes(&self) -> usize {
        fn validity_bytes(validity: Option<&Bitmap>) -> usize {
            validity.map(|v| v.data().len()).unwrap_or(0)
        }

        match self {
            Array::Int32(arr) => {
                std::mem::size_of_val(arr.values()) + validity_bytes(arr.validity())
            }
            Array::Int64(arr) => {
                std::mem::size_of_val(arr.values()) + validity_bytes(arr.validity())
            }
            Array::UInt64(arr) => {
                std::mem::size_of_val(arr.values()) + validity_bytes(arr.validity())
            }
            Array::Float64(arr) => {
                std::mem::size_of_val(arr.values()) + validity_bytes(arr.validity())
            }
            Array::Utf8(arr) => {
                arr.data().len()
                    + std::mem::size_of_val(arr.offsets())
                    + validity_bytes(arr.validity())
            }
        }
    }
}
