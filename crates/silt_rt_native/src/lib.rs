//! Native runtime for spill-capable operators: spill streams backed by
//! local files and the IO pools that service them.

pub mod config;
pub mod io_pool;
pub mod spill_manager;
pub mod spill_stream;
