pub mod dependency;
pub mod io_pool;
pub mod query;
