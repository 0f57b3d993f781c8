use std::fmt::Debug;

use silt_error::Result;

/// Work submitted to an IO pool.
pub type IoTask = Box<dyn FnOnce() + Send + 'static>;

/// Thread pool for background IO work such as draining spill data to disk.
///
/// Submission is fallible. A pool backed by a bounded queue may reject work,
/// and callers are expected to recover rather than abort.
pub trait IoPool: Debug + Send + Sync {
    fn submit(&self, task: IoTask) -> Result<()>;
}
