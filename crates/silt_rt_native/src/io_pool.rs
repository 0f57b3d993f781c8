use std::fmt;

use rayon::{ThreadPool, ThreadPoolBuilder};
use silt_core::runtime::io_pool::{IoPool, IoTask};
use silt_error::{Result, SiltError};

/// IO pool backed by a dedicated rayon thread pool.
pub struct ThreadedIoPool {
    pool: ThreadPool,
}

impl ThreadedIoPool {
    pub fn try_new(num_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|idx| format!("silt-spill-{idx}"))
            .build()
            .map_err(|e| {
                SiltError::with_source("Failed to build spill IO thread pool", Box::new(e))
            })?;
        Ok(ThreadedIoPool { pool })
    }
}

impl IoPool for ThreadedIoPool {
    fn submit(&self, task: IoTask) -> Result<()> {
        self.pool.spawn(task);
        Ok(())
    }
}

impl fmt::Debug for ThreadedIoPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadedIoPool")
            .field("threads", &self.pool.current_num_threads())
            .finish_non_exhaustive()
    }
}
