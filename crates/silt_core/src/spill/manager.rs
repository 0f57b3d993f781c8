use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use silt_error::Result;

use crate::runtime::io_pool::IoPool;
use crate::spill::stream::{SpillStream, SpillStreamProps};

/// Creates spill streams and hands out the IO pools that service them.
///
/// Implementations decide where streams live (local disks, remote storage)
/// and how IO work against each location is scheduled.
pub trait SpillStreamManager: Debug + Send + Sync {
    /// Register a new stream for writing one run.
    fn register_stream(&self, props: SpillStreamProps) -> Result<Box<dyn SpillStream>>;

    /// Get the IO pool responsible for the given storage location.
    fn io_pool_for(&self, location: &Path) -> Result<Arc<dyn IoPool>>;
}
