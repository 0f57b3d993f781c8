use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters describing spill activity for a single operator.
///
/// Shared between the operator and its background spill jobs, so all
/// counters are atomic. Relaxed ordering is fine, the values are
/// informational.
#[derive(Debug, Default)]
pub struct SpillMetrics {
    pub spilled_runs: AtomicU64,
    pub spilled_batches: AtomicU64,
    pub spilled_rows: AtomicU64,
    pub spilled_bytes: AtomicU64,
    pub write_time_ns: AtomicU64,
}

impl SpillMetrics {
    pub fn record_batch_write(&self, rows: usize, bytes: usize, elapsed: Duration) {
        self.spilled_batches.fetch_add(1, Ordering::Relaxed);
        self.spilled_rows.fetch_add(rows as u64, Ordering::Relaxed);
        self.spilled_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.write_time_ns
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_run_complete(&self) {
        self.spilled_runs.fetch_add(1, Ordering::Relaxed);
    }
}
