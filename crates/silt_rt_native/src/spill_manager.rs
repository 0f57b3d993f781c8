use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use silt_core::runtime::io_pool::IoPool;
use silt_core::spill::manager::SpillStreamManager;
use silt_core::spill::stream::{SpillStream, SpillStreamId, SpillStreamProps};
use silt_error::{Result, ResultExt, SiltError};
use tracing::debug;

use crate::config::NativeSpillConfig;
use crate::io_pool::ThreadedIoPool;
use crate::spill_stream::FileSpillStream;

#[derive(Debug)]
struct SpillRoot {
    dir: PathBuf,
    pool: Arc<dyn IoPool>,
}

/// Spill stream manager writing runs to local directories.
///
/// Each configured root gets its own IO pool so a slow disk does not stall
/// spills headed elsewhere. Streams are spread round robin across roots
/// and live under a per-query subdirectory.
#[derive(Debug)]
pub struct NativeSpillStreamManager {
    roots: Vec<SpillRoot>,
    next_root: AtomicUsize,
    next_sequence: AtomicU64,
    read_buffer_size: usize,
}

impl NativeSpillStreamManager {
    pub fn try_new(config: NativeSpillConfig) -> Result<Self> {
        if config.root_dirs.is_empty() {
            return Err(SiltError::new(
                "At least one spill root directory is required",
            ));
        }

        let mut roots = Vec::with_capacity(config.root_dirs.len());
        for dir in config.root_dirs {
            fs::create_dir_all(&dir).context_fn(|| {
                format!("Failed to create spill root directory: {}", dir.display())
            })?;
            let pool = Arc::new(ThreadedIoPool::try_new(config.io_threads_per_root)?);
            roots.push(SpillRoot { dir, pool });
        }

        Ok(NativeSpillStreamManager {
            roots,
            next_root: AtomicUsize::new(0),
            next_sequence: AtomicU64::new(0),
            read_buffer_size: config.read_buffer_size,
        })
    }
}

impl SpillStreamManager for NativeSpillStreamManager {
    fn register_stream(&self, props: SpillStreamProps) -> Result<Box<dyn SpillStream>> {
        let root = &self.roots[self.next_root.fetch_add(1, Ordering::Relaxed) % self.roots.len()];
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);

        let id = SpillStreamId {
            query_id: props.query_id,
            operator_id: props.operator_id,
            sequence,
        };
        let path = root.dir.join(props.query_id.to_string()).join(format!(
            "{}-{}-{}.run",
            props.operator_kind, props.operator_id, sequence
        ));
        debug!(stream_id = %id, path = %path.display(), "registered spill stream");

        Ok(Box::new(FileSpillStream::new(
            id,
            path,
            props.metrics,
            self.read_buffer_size,
            props.batch_byte_budget,
        )))
    }

    fn io_pool_for(&self, location: &Path) -> Result<Arc<dyn IoPool>> {
        for root in &self.roots {
            if location.starts_with(&root.dir) {
                return Ok(root.pool.clone());
            }
        }
        Err(SiltError::new("No IO pool covers the spill location")
            .with_field("location", location.display()))
    }
}
