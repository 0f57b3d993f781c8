use std::fmt;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use silt_error::Result;
use uuid::Uuid;

use crate::arrays::batch::Batch;
use crate::spill::metrics::SpillMetrics;

/// Identifies a single spill stream within a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpillStreamId {
    pub query_id: Uuid,
    pub operator_id: u32,
    /// Sequence number distinguishing streams written by the same operator.
    pub sequence: u64,
}

impl fmt::Display for SpillStreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-op{}-run{}",
            self.query_id, self.operator_id, self.sequence
        )
    }
}

/// Properties for registering a new spill stream.
#[derive(Debug, Clone)]
pub struct SpillStreamProps {
    pub query_id: Uuid,
    /// Short name of the operator kind writing the stream, used in spill
    /// file names.
    pub operator_kind: &'static str,
    pub operator_id: u32,
    /// Number of rows per batch written to the stream.
    pub batch_row_count: usize,
    /// Soft cap on encoded batch size in bytes.
    pub batch_byte_budget: usize,
    pub metrics: Arc<SpillMetrics>,
}

/// A single spilled run of batches on external storage.
///
/// A stream is write-once: batches are appended in order, the stream is
/// finalized, and only then may it be read back. Finalizing with a
/// non-success status discards the stream's data.
pub trait SpillStream: Debug + Send {
    fn id(&self) -> SpillStreamId;

    /// Storage location backing this stream.
    fn location(&self) -> &Path;

    /// Prepare the stream to accept appends.
    fn prepare_for_write(&mut self) -> Result<()>;

    /// Append a batch. `is_last` marks the final batch of the run.
    fn append_batch(&mut self, batch: &Batch, is_last: bool) -> Result<()>;

    /// Complete the write phase with the overall status of the producing
    /// job. On success the data is persisted for reading, and an error is
    /// returned if persisting fails. Otherwise the data is discarded.
    fn finalize(&mut self, status: &Result<()>) -> Result<()>;

    /// Prepare a finalized stream for reading from the start.
    fn prepare_for_read(&mut self) -> Result<()>;

    /// Read the next batch, or None once the run is exhausted.
    fn read_next(&mut self) -> Result<Option<Batch>>;
}
