pub mod codec;
pub mod manager;
pub mod metrics;
pub mod stream;
