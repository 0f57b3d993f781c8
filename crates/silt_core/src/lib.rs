pub mod arrays;
pub mod execution;
pub mod runtime;
pub mod spill;
