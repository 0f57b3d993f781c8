pub mod array;
pub mod batch;
pub mod bitmap;
pub mod interleave;
pub mod row_encoding;
