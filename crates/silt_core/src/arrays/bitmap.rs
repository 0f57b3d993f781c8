use silt_error::{Result, SiltError};

/// Bit-packed boolean bitmap, used for tracking array validity.
///
/// Bits beyond the logical length are always zero, which keeps equality
/// checks on the raw bytes meaningful.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bitmap {
    len: usize,
    data: Vec<u8>,
}

impl Bitmap {
    /// Create a bitmap of the given length with all values set to true.
    pub fn with_all_true(len: usize) -> Self {
        let mut data = vec![u8::MAX; len.div_ceil(8)];
        zero_trailing_bits(len, &mut data);
        Bitmap { len, data }
    }

    /// Create a bitmap from pre-packed bytes.
    pub fn try_from_packed(len: usize, mut data: Vec<u8>) -> Result<Self> {
        if data.len() != len.div_ceil(8) {
            return Err(SiltError::new("Byte length does not match bitmap length")
                .with_field("len", len)
                .with_field("bytes", data.len()));
        }
        zero_trailing_bits(len, &mut data);
        Ok(Bitmap { len, data })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the packed representation of the bitmap.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get the value of the bit at `idx`.
    ///
    /// Panics if `idx` is out of bounds.
    pub fn value(&self, idx: usize) -> bool {
        assert!(idx < self.len, "bit index out of bounds");
        self.data[idx / 8] & (1 << (idx % 8)) != 0
    }

    /// Set the bit at `idx`.
    ///
    /// Panics if `idx` is out of bounds.
    pub fn set(&mut self, idx: usize, val: bool) {
        assert!(idx < self.len, "bit index out of bounds");
        if val {
            self.data[idx / 8] |= 1 << (idx % 8);
        } else {
            self.data[idx / 8] &= !(1 << (idx % 8));
        }
    }

    pub fn push(&mut self, val: bool) {
        if self.len % 8 == 0 {
            self.data.push(0);
        }
        self.len += 1;
        self.set(self.len - 1, val);
    }

    pub fn count_trues(&self) -> usize {
        self.data.iter().map(|b| b.count_ones() as usize).sum()
    }

    pub fn is_all_true(&self) -> bool {
        self.count_trues() == self.len
    }

    pub fn iter(&self) -> BitmapIter<'_> {
        BitmapIter {
            bitmap: self,
            idx: 0,
        }
    }
}

impl FromIterator<bool> for Bitmap {
    fn from_iter<T: IntoIterator<Item = bool>>(iter: T) -> Self {
        let mut bitmap = Bitmap::default();
        for val in iter {
            bitmap.push(val);
        }
        bitmap
    }
}

#[derive(Debug)]
pub struct BitmapIter<'a> {
    bitmap: &'a Bitmap,
    idx: usize,
}

impl Iterator for BitmapIter<'_> {
    type Item = bool;

    fn next(&mut self) -> Option<Self::Item> {
        if self.idx >= self.bitmap.len() {
            return None;
        }
        let val = self.bitmap.value(self.idx);
        self.idx += 1;
        Some(val)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.bitmap.len() - self.idx;
        (remaining, Some(remaining))
    }
}

fn zero_trailing_bits(len: usize, data: &mut [u8]) {
    if len % 8 != 0 {
        if let Some(last) = data.last_mut() {
            *last &= (1 << (len % 8)) - 1;
        }
    }
}
