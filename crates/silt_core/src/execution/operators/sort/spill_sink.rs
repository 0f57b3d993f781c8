use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use silt_error::{Result, SiltError};
use tracing::{debug, error, warn};

use crate::arrays::batch::Batch;
use crate::execution::operators::sort::sort_keys::SortExpr;
use crate::execution::operators::sort::sorter::{InMemorySorter, Sorter};
use crate::runtime::dependency::Dependency;
use crate::runtime::query::QueryContext;
use crate::spill::manager::SpillStreamManager;
use crate::spill::metrics::SpillMetrics;
use crate::spill::stream::{SpillStream, SpillStreamProps};

/// Soft cap on the encoded size of a single spilled batch.
pub const SORT_BLOCK_SPILL_BATCH_BYTES: usize = 8 * 1024 * 1024;

/// Rows per spilled batch when no input batch arrived before the first
/// drain.
pub const DEFAULT_SPILL_BATCH_ROW_COUNT: usize = 4096;

#[derive(Debug, Clone)]
pub struct SpillSortProps {
    pub operator_id: u32,
    /// Whether this sink may drain sorted runs to external storage. When
    /// false, all accepted data stays resident and revoke requests report
    /// nothing to reclaim.
    pub enable_spill: bool,
}

/// Coordination state shared between the operator and its drain jobs.
#[derive(Debug)]
struct SinkInner {
    /// Sticky operator status. Once failed, every later sink, revoke, and
    /// close observes the same error.
    status: Result<()>,
    /// Completed runs, appended by the drain job only after a run is
    /// finalized successfully. Readers never observe half-written runs.
    sorted_runs: Vec<Box<dyn SpillStream>>,
    /// Rows per batch read out of the sorter while draining, fixed from
    /// the first non-empty input batch.
    spill_batch_row_count: Option<usize>,
    /// True while a drain job is in flight. At most one at a time.
    is_spilling: bool,
    /// Stream registered for the in-flight drain. The drain job takes it,
    /// and pushes it into sorted_runs on success.
    spilling_stream: Option<Box<dyn SpillStream>>,
    /// True once the final input batch has been accepted. Never unset.
    eos: bool,
}

struct SinkShared {
    inner: Mutex<SinkInner>,
    /// Signaled under the inner lock whenever a drain job completes.
    spill_complete: Condvar,
    /// Sort state. Kept outside the coordination lock so a drain can hold
    /// it for the duration of the drain without blocking status reads.
    sorter: Mutex<Box<dyn Sorter>>,
}

/// Sink half of a sort operator that can spill sorted runs to external
/// storage under memory pressure.
///
/// Input batches accumulate in an in-memory sorter. When asked to revoke
/// memory, the sink registers a spill stream and hands the drain to a
/// background IO pool: the sorter's contents are written out as one sorted
/// run and the sorter is reset. While the drain is in flight the sink
/// dependency is blocked so no new input arrives, and a close call waits
/// for the drain to settle.
pub struct SpillSortSink {
    props: SpillSortProps,
    query: Arc<QueryContext>,
    manager: Arc<dyn SpillStreamManager>,
    metrics: Arc<SpillMetrics>,
    shared: Arc<SinkShared>,
    /// Bytes resident in the sorter, mirrored atomically so memory probes
    /// never contend with an in-flight drain holding the sorter lock.
    mem_used: Arc<AtomicUsize>,
    /// Blocked while a drain is in flight, gating further input.
    sink_dependency: Arc<Dependency>,
    /// Released once sorted output is ready to be read.
    read_dependency: Arc<Dependency>,
    /// Released once the sink has no further work, including any final
    /// drain.
    finish_dependency: Arc<Dependency>,
}

impl SpillSortSink {
    pub fn new(
        props: SpillSortProps,
        exprs: &[SortExpr],
        query: Arc<QueryContext>,
        manager: Arc<dyn SpillStreamManager>,
    ) -> Self {
        // A spilling sink finishes only after its final drain settles. A
        // non-spilling sink has nothing outstanding at any point.
        let finish_dependency = if props.enable_spill {
            Dependency::new_blocked("sort_sink_finish")
        } else {
            Dependency::new_ready("sort_sink_finish")
        };

        SpillSortSink {
            shared: Arc::new(SinkShared {
                inner: Mutex::new(SinkInner {
                    status: Ok(()),
                    sorted_runs: Vec::new(),
                    spill_batch_row_count: None,
                    is_spilling: false,
                    spilling_stream: None,
                    eos: false,
                }),
                spill_complete: Condvar::new(),
                sorter: Mutex::new(Box::new(InMemorySorter::new(exprs))),
            }),
            mem_used: Arc::new(AtomicUsize::new(0)),
            metrics: Arc::new(SpillMetrics::default()),
            sink_dependency: Arc::new(Dependency::new_ready("sort_sink")),
            read_dependency: Arc::new(Dependency::new_blocked("sort_sink_read")),
            finish_dependency: Arc::new(finish_dependency),
            props,
            query,
            manager,
        }
    }

    /// Accept an input batch, with `is_last` marking the end of input.
    ///
    /// Callers must hold off while the sink dependency is blocked. On the
    /// last batch the sink either schedules a final drain of resident data
    /// or makes the sorted data available for direct reads.
    pub fn sink(&mut self, batch: Batch, is_last: bool) -> Result<()> {
        {
            let mut inner = self.shared.inner.lock();
            inner.status.clone()?;
            if inner.eos {
                return Err(SiltError::new(
                    "Sort sink received input after the final batch",
                ));
            }
            if batch.num_rows() > 0 && inner.spill_batch_row_count.is_none() {
                inner.spill_batch_row_count = Some(batch.num_rows());
            }
            if is_last {
                inner.eos = true;
            }
        }

        let accept_result = {
            let mut sorter = self.shared.sorter.lock();
            sorter.accept(batch).map(|_| sorter.current_size())
        };
        match accept_result {
            Ok(size) => self.mem_used.store(size, Ordering::Release),
            Err(err) => {
                let mut inner = self.shared.inner.lock();
                inner.status = Err(err.clone());
                return Err(err);
            }
        }

        if is_last {
            return self.finish_input();
        }
        Ok(())
    }

    fn finish_input(&mut self) -> Result<()> {
        debug!(
            query_id = %self.query.query_id(),
            operator_id = self.props.operator_id,
            "sort sink input finished"
        );

        if self.props.enable_spill && self.revocable_mem_size() > 0 {
            // Final drain. The sink dependency stays open since no more
            // input follows; read and finish are released when the drain
            // settles. A failure here propagates to the caller and fails
            // the query.
            return self.revoke_memory();
        }

        // Everything resident (possibly nothing) is served with direct
        // reads.
        let prepare_result = {
            let mut sorter = self.shared.sorter.lock();
            sorter.prepare_for_read()
        };
        if let Err(err) = prepare_result {
            let mut inner = self.shared.inner.lock();
            inner.status = Err(err.clone());
            return Err(err);
        }

        self.read_dependency.set_ready();
        self.finish_dependency.set_ready();
        Ok(())
    }

    /// Bytes the sink could free by spilling.
    ///
    /// Returns zero when spilling is disabled, and `usize::MAX` once the
    /// sink has failed so memory-pressure probes drive a revoke that
    /// surfaces the stored error.
    pub fn revocable_mem_size(&self) -> usize {
        if !self.props.enable_spill {
            return 0;
        }
        {
            let inner = self.shared.inner.lock();
            if inner.status.is_err() {
                return usize::MAX;
            }
        }
        self.mem_used.load(Ordering::Acquire)
    }

    /// Drain resident sorted data to a new spill stream on a background IO
    /// pool.
    ///
    /// A no-op when spilling is disabled. Any setup failure rolls the sink
    /// back to its pre-revoke state with data intact, and is returned
    /// without being latched. Panics if a drain is already in flight; the
    /// dependency protocol prevents overlapping revokes.
    pub fn revoke_memory(&mut self) -> Result<()> {
        if !self.props.enable_spill {
            return Ok(());
        }

        let (eos, batch_row_count) = {
            let mut inner = self.shared.inner.lock();
            assert!(
                !inner.is_spilling,
                "spill already in flight for sort sink"
            );
            inner.is_spilling = true;

            if let Err(err) = inner.status.clone() {
                inner.is_spilling = false;
                return Err(err);
            }

            (
                inner.eos,
                inner
                    .spill_batch_row_count
                    .unwrap_or(DEFAULT_SPILL_BATCH_ROW_COUNT),
            )
        };

        debug!(
            query_id = %self.query.query_id(),
            operator_id = self.props.operator_id,
            eos,
            revocable_bytes = self.mem_used.load(Ordering::Acquire),
            "starting sort spill"
        );

        let mut stream = match self.manager.register_stream(self.stream_props(batch_row_count)) {
            Ok(stream) => stream,
            Err(err) => return self.rollback_spill_setup(err, eos),
        };
        if let Err(err) = stream.prepare_for_write() {
            return self.rollback_spill_setup(err, eos);
        }

        // No new input while the drain owns the sorter. After the final
        // batch there is no input left to gate.
        if !eos {
            self.sink_dependency.block();
        }

        let pool = match self.manager.io_pool_for(stream.location()) {
            Ok(pool) => pool,
            Err(err) => return self.rollback_spill_setup(err, eos),
        };

        {
            let mut inner = self.shared.inner.lock();
            inner.spilling_stream = Some(stream);
        }

        let shared = self.shared.clone();
        let query = self.query.clone();
        let mem_used = self.mem_used.clone();
        let sink_dep = self.sink_dependency.clone();
        let read_dep = self.read_dependency.clone();
        let finish_dep = self.finish_dependency.clone();
        let submit_result = pool.submit(Box::new(move || {
            run_spill_drain(
                &shared,
                &query,
                &sink_dep,
                &read_dep,
                &finish_dep,
                &mem_used,
                batch_row_count,
            );
        }));

        if let Err(err) = submit_result {
            return self.rollback_spill_setup(err, eos);
        }

        Ok(())
    }

    fn rollback_spill_setup(&self, err: SiltError, eos: bool) -> Result<()> {
        {
            let mut inner = self.shared.inner.lock();
            inner.is_spilling = false;
            inner.spilling_stream = None;
        }
        if !eos {
            self.sink_dependency.set_ready();
        }
        warn!(
            query_id = %self.query.query_id(),
            operator_id = self.props.operator_id,
            %err,
            "sort spill setup failed, keeping data resident"
        );
        Err(err)
    }

    /// Read the next batch of sorted resident data. Valid once the read
    /// dependency is released and no runs were spilled.
    pub fn read_direct_next(&mut self, max_rows: usize) -> Result<(Batch, bool)> {
        {
            let inner = self.shared.inner.lock();
            inner.status.clone()?;
        }
        let mut sorter = self.shared.sorter.lock();
        sorter.read_next_sorted(max_rows)
    }

    /// Take ownership of all completed spill runs for merging.
    pub fn take_sorted_runs(&mut self) -> Vec<Box<dyn SpillStream>> {
        std::mem::take(&mut self.shared.inner.lock().sorted_runs)
    }

    pub fn spilled_run_count(&self) -> usize {
        self.shared.inner.lock().sorted_runs.len()
    }

    pub fn is_spilling(&self) -> bool {
        self.shared.inner.lock().is_spilling
    }

    /// Tear the sink down, waiting for any in-flight drain to settle.
    /// Returns the sink's final status.
    pub fn close(&mut self) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        while inner.is_spilling {
            self.shared.spill_complete.wait(&mut inner);
        }
        inner.status.clone()
    }

    pub fn sink_dependency(&self) -> &Arc<Dependency> {
        &self.sink_dependency
    }

    pub fn read_dependency(&self) -> &Arc<Dependency> {
        &self.read_dependency
    }

    pub fn finish_dependency(&self) -> &Arc<Dependency> {
        &self.finish_dependency
    }

    pub fn metrics(&self) -> &Arc<SpillMetrics> {
        &self.metrics
    }

    fn stream_props(&self, batch_row_count: usize) -> SpillStreamProps {
        SpillStreamProps {
            query_id: self.query.query_id(),
            operator_kind: "sort",
            operator_id: self.props.operator_id,
            batch_row_count,
            batch_byte_budget: SORT_BLOCK_SPILL_BATCH_BYTES,
            metrics: self.metrics.clone(),
        }
    }
}

impl fmt::Debug for SpillSortSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpillSortSink")
            .field("operator_id", &self.props.operator_id)
            .field("enable_spill", &self.props.enable_spill)
            .finish_non_exhaustive()
    }
}

enum DrainOutcome {
    Finished,
    Cancelled,
    Failed(SiltError),
}

/// Body of the background drain job.
///
/// Consumes the stream registered by the revoke, writes the sorter's
/// contents to it as one run, and publishes the result: on success the run
/// becomes visible, on failure the status is latched and all completed
/// runs are discarded, and on cancellation the run is discarded without
/// failing the sink. Always resets the sorter, flips the in-flight flag
/// back, and releases the gates matching the sink's phase.
fn run_spill_drain(
    shared: &SinkShared,
    query: &QueryContext,
    sink_dep: &Dependency,
    read_dep: &Dependency,
    finish_dep: &Dependency,
    mem_used: &AtomicUsize,
    batch_row_count: usize,
) {
    let taken = {
        let mut inner = shared.inner.lock();
        inner.spilling_stream.take()
    };
    let mut stream = match taken {
        Some(stream) => stream,
        None => {
            // Coordination bug. Fail the sink rather than panic on a pool
            // thread.
            error!(query_id = %query.query_id(), "spill drain started without a registered stream");
            let eos = {
                let mut inner = shared.inner.lock();
                inner.status = Err(SiltError::new(
                    "Spill drain started without a registered stream",
                ));
                inner.is_spilling = false;
                shared.spill_complete.notify_all();
                inner.eos
            };
            release_gates(eos, sink_dep, read_dep, finish_dep);
            return;
        }
    };

    let outcome = drain_sorter_to_stream(shared, query, stream.as_mut(), batch_row_count);

    // The drain consumed the sorter's state regardless of outcome.
    {
        let mut sorter = shared.sorter.lock();
        sorter.reset();
    }
    mem_used.store(0, Ordering::Release);

    let final_status = match &outcome {
        DrainOutcome::Finished => Ok(()),
        DrainOutcome::Cancelled => Err(SiltError::new("Query canceled during sort spill")),
        DrainOutcome::Failed(err) => Err(err.clone()),
    };
    // A run that drained fine but could not be persisted is still a failed
    // run.
    let outcome = match (outcome, stream.finalize(&final_status)) {
        (DrainOutcome::Finished, Err(err)) => DrainOutcome::Failed(err),
        (outcome, _) => outcome,
    };

    let eos = {
        let mut inner = shared.inner.lock();
        match outcome {
            DrainOutcome::Finished => {
                inner.sorted_runs.push(stream);
            }
            DrainOutcome::Cancelled => {
                // A canceled query never reads its output. Not a sink
                // failure, so the status stays untouched.
                debug!(query_id = %query.query_id(), "sort spill canceled, discarding runs");
                inner.sorted_runs.clear();
            }
            DrainOutcome::Failed(err) => {
                warn!(query_id = %query.query_id(), %err, "sort spill failed, discarding runs");
                inner.sorted_runs.clear();
                inner.status = Err(err);
            }
        }
        inner.is_spilling = false;
        shared.spill_complete.notify_all();
        inner.eos
    };

    release_gates(eos, sink_dep, read_dep, finish_dep);
}

fn release_gates(eos: bool, sink_dep: &Dependency, read_dep: &Dependency, finish_dep: &Dependency) {
    if eos {
        read_dep.set_ready();
        finish_dep.set_ready();
    } else {
        sink_dep.set_ready();
    }
}

fn drain_sorter_to_stream(
    shared: &SinkShared,
    query: &QueryContext,
    stream: &mut dyn SpillStream,
    batch_row_count: usize,
) -> DrainOutcome {
    let start = Instant::now();
    let mut sorter = shared.sorter.lock();

    if let Err(err) = sorter.prepare_for_read() {
        return DrainOutcome::Failed(err);
    }

    let mut batches = 0_u64;
    let mut rows = 0_u64;
    loop {
        if query.is_canceled() {
            return DrainOutcome::Cancelled;
        }

        let (batch, last) = match sorter.read_next_sorted(batch_row_count) {
            Ok(out) => out,
            Err(err) => return DrainOutcome::Failed(err),
        };
        batches += 1;
        rows += batch.num_rows() as u64;
        if let Err(err) = stream.append_batch(&batch, last) {
            return DrainOutcome::Failed(err);
        }
        if last {
            break;
        }
    }

    debug!(
        query_id = %query.query_id(),
        stream_id = %stream.id(),
        batches,
        rows,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "sort spill drain finished"
    );
    DrainOutcome::Finished
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use super::*;
    use crate::execution::operators::sort::test_util::{
        asc_keys_on_first_column,
        collect_i64_column,
        make_i64_batch,
    };
    use crate::runtime::io_pool::{IoPool, IoTask};
    use crate::spill::stream::SpillStreamId;

    #[derive(Debug, Default)]
    struct FakeStreamState {
        appends: Mutex<Vec<(Batch, bool)>>,
        finalized: Mutex<Option<Result<()>>>,
        discarded: AtomicBool,
    }

    #[derive(Debug)]
    struct FakeStream {
        id: SpillStreamId,
        location: PathBuf,
        state: Arc<FakeStreamState>,
        fail_on_append: Option<usize>,
        cancel_query_on_append: Option<(usize, Arc<QueryContext>)>,
        append_delay: Option<Duration>,
        read_idx: usize,
    }

    impl SpillStream for FakeStream {
        fn id(&self) -> SpillStreamId {
            self.id
        }

        fn location(&self) -> &Path {
            &self.location
        }

        fn prepare_for_write(&mut self) -> Result<()> {
            Ok(())
        }

        fn append_batch(&mut self, batch: &Batch, is_last: bool) -> Result<()> {
            if let Some(delay) = self.append_delay {
                std::thread::sleep(delay);
            }
            let idx = self.state.appends.lock().len();
            if let Some((at, query)) = &self.cancel_query_on_append {
                if idx == *at {
                    query.cancel();
                }
            }
            if Some(idx) == self.fail_on_append {
                return Err(SiltError::new("simulated append failure"));
            }
            self.state.appends.lock().push((batch.clone(), is_last));
            Ok(())
        }

        fn finalize(&mut self, status: &Result<()>) -> Result<()> {
            *self.state.finalized.lock() = Some(status.clone());
            if status.is_err() {
                self.state.discarded.store(true, Ordering::SeqCst);
                self.state.appends.lock().clear();
            }
            Ok(())
        }

        fn prepare_for_read(&mut self) -> Result<()> {
            self.read_idx = 0;
            Ok(())
        }

        fn read_next(&mut self) -> Result<Option<Batch>> {
            let appends = self.state.appends.lock();
            match appends.get(self.read_idx) {
                Some((batch, _)) => {
                    self.read_idx += 1;
                    Ok(Some(batch.clone()))
                }
                None => Ok(None),
            }
        }
    }

    #[derive(Debug)]
    struct FakeSpillManager {
        pool: Arc<dyn IoPool>,
        streams: Mutex<Vec<Arc<FakeStreamState>>>,
        fail_register: AtomicBool,
        fail_on_append: Mutex<Option<usize>>,
        cancel_on_append: Mutex<Option<(usize, Arc<QueryContext>)>>,
        append_delay: Mutex<Option<Duration>>,
    }

    impl FakeSpillManager {
        fn new(pool: Arc<dyn IoPool>) -> Self {
            FakeSpillManager {
                pool,
                streams: Mutex::new(Vec::new()),
                fail_register: AtomicBool::new(false),
                fail_on_append: Mutex::new(None),
                cancel_on_append: Mutex::new(None),
                append_delay: Mutex::new(None),
            }
        }

        fn stream_state(&self, idx: usize) -> Arc<FakeStreamState> {
            self.streams.lock()[idx].clone()
        }
    }

    impl SpillStreamManager for FakeSpillManager {
        fn register_stream(&self, props: SpillStreamProps) -> Result<Box<dyn SpillStream>> {
            if self.fail_register.load(Ordering::SeqCst) {
                return Err(SiltError::new("simulated register failure"));
            }
            let state = Arc::new(FakeStreamState::default());
            let sequence = {
                let mut streams = self.streams.lock();
                streams.push(state.clone());
                streams.len() as u64 - 1
            };
            Ok(Box::new(FakeStream {
                id: SpillStreamId {
                    query_id: props.query_id,
                    operator_id: props.operator_id,
                    sequence,
                },
                location: PathBuf::from("/fake/spill"),
                state,
                fail_on_append: self.fail_on_append.lock().take(),
                cancel_query_on_append: self.cancel_on_append.lock().take(),
                append_delay: self.append_delay.lock().take(),
                read_idx: 0,
            }))
        }

        fn io_pool_for(&self, _location: &Path) -> Result<Arc<dyn IoPool>> {
            Ok(self.pool.clone())
        }
    }

    /// Runs submitted tasks immediately on the caller's thread.
    #[derive(Debug)]
    struct InlinePool;

    impl IoPool for InlinePool {
        fn submit(&self, task: IoTask) -> Result<()> {
            task();
            Ok(())
        }
    }

    /// Holds submitted tasks until the test runs them, exposing the
    /// mid-flight state.
    #[derive(Default)]
    struct QueuedPool {
        tasks: Mutex<Vec<IoTask>>,
    }

    impl QueuedPool {
        fn pending(&self) -> usize {
            self.tasks.lock().len()
        }

        fn run_all(&self) {
            let tasks = std::mem::take(&mut *self.tasks.lock());
            for task in tasks {
                task();
            }
        }
    }

    impl fmt::Debug for QueuedPool {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("QueuedPool")
                .field("pending", &self.pending())
                .finish()
        }
    }

    impl IoPool for QueuedPool {
        fn submit(&self, task: IoTask) -> Result<()> {
            self.tasks.lock().push(task);
            Ok(())
        }
    }

    /// Rejects every submission.
    #[derive(Debug)]
    struct RejectingPool;

    impl IoPool for RejectingPool {
        fn submit(&self, _task: IoTask) -> Result<()> {
            Err(SiltError::new("simulated pool rejection"))
        }
    }

    /// Spawns a thread per task.
    #[derive(Debug)]
    struct SpawnPool;

    impl IoPool for SpawnPool {
        fn submit(&self, task: IoTask) -> Result<()> {
            std::thread::spawn(task);
            Ok(())
        }
    }

    fn make_sink(
        enable_spill: bool,
        pool: Arc<dyn IoPool>,
    ) -> (SpillSortSink, Arc<FakeSpillManager>, Arc<QueryContext>) {
        let query = Arc::new(QueryContext::new());
        let manager = Arc::new(FakeSpillManager::new(pool));
        let sink = SpillSortSink::new(
            SpillSortProps {
                operator_id: 7,
                enable_spill,
            },
            &asc_keys_on_first_column(),
            query.clone(),
            manager.clone(),
        );
        (sink, manager, query)
    }

    fn run_rows(state: &FakeStreamState) -> Vec<i64> {
        state
            .appends
            .lock()
            .iter()
            .flat_map(|(batch, _)| collect_i64_column(batch, 0))
            .collect()
    }

    #[test]
    fn no_spill_direct_read_sorted() {
        let (mut sink, _manager, _query) = make_sink(false, Arc::new(InlinePool));
        assert!(sink.finish_dependency().is_ready());
        assert!(!sink.read_dependency().is_ready());

        sink.sink(make_i64_batch([3, 1]), false).unwrap();
        assert_eq!(0, sink.revocable_mem_size());

        sink.sink(make_i64_batch([2]), true).unwrap();
        assert!(sink.read_dependency().is_ready());

        let (batch, last) = sink.read_direct_next(10).unwrap();
        assert!(last);
        assert_eq!(vec![1, 2, 3], collect_i64_column(&batch, 0));

        assert_eq!(0, sink.spilled_run_count());
        sink.close().unwrap();
    }

    #[test]
    fn revoke_with_spill_disabled_is_noop() {
        let (mut sink, manager, _query) = make_sink(false, Arc::new(InlinePool));
        sink.sink(make_i64_batch([5, 4]), false).unwrap();

        sink.revoke_memory().unwrap();
        assert!(!sink.is_spilling());
        assert!(manager.streams.lock().is_empty());
    }

    #[test]
    fn revoke_spills_single_run_and_unblocks_gate() {
        let pool = Arc::new(QueuedPool::default());
        let (mut sink, manager, _query) = make_sink(true, pool.clone());

        sink.sink(make_i64_batch([5, 2, 9]), false).unwrap();
        assert!(sink.revocable_mem_size() > 0);
        assert!(sink.sink_dependency().is_ready());

        sink.revoke_memory().unwrap();
        assert!(sink.is_spilling());
        assert!(!sink.sink_dependency().is_ready());
        assert_eq!(1, pool.pending());

        pool.run_all();
        assert!(!sink.is_spilling());
        assert!(sink.sink_dependency().is_ready());
        assert_eq!(1, sink.spilled_run_count());
        assert_eq!(0, sink.revocable_mem_size());

        let state = manager.stream_state(0);
        let appends = state.appends.lock();
        assert_eq!(1, appends.len());
        assert!(appends[0].1, "single batch run must be marked last");
        assert_eq!(vec![2, 5, 9], collect_i64_column(&appends[0].0, 0));
        assert!(matches!(*state.finalized.lock(), Some(Ok(()))));
    }

    #[test]
    fn eos_with_resident_data_spills_final_run() {
        let (mut sink, manager, _query) = make_sink(true, Arc::new(InlinePool));

        // The inline pool runs the final drain before sink returns.
        sink.sink(make_i64_batch([2, 1]), true).unwrap();

        assert!(sink.read_dependency().is_ready());
        assert!(sink.finish_dependency().is_ready());
        assert_eq!(1, sink.spilled_run_count());
        assert_eq!(vec![1, 2], run_rows(&manager.stream_state(0)));

        // Input is closed for good.
        sink.sink(make_i64_batch([3]), false).unwrap_err();
        sink.close().unwrap();
    }

    #[test]
    fn multiple_revokes_produce_multiple_runs() {
        let pool = Arc::new(QueuedPool::default());
        let (mut sink, manager, _query) = make_sink(true, pool.clone());

        sink.sink(make_i64_batch([5, 2]), false).unwrap();
        sink.revoke_memory().unwrap();
        pool.run_all();

        sink.sink(make_i64_batch([4, 1]), false).unwrap();
        sink.revoke_memory().unwrap();
        pool.run_all();

        sink.sink(make_i64_batch([3]), true).unwrap();
        pool.run_all();

        assert_eq!(3, sink.spilled_run_count());
        assert_eq!(vec![2, 5], run_rows(&manager.stream_state(0)));
        assert_eq!(vec![1, 4], run_rows(&manager.stream_state(1)));
        assert_eq!(vec![3], run_rows(&manager.stream_state(2)));

        let mut all: Vec<i64> = Vec::new();
        for run in sink.take_sorted_runs().iter_mut() {
            run.prepare_for_read().unwrap();
            while let Some(batch) = run.read_next().unwrap() {
                all.extend(collect_i64_column(&batch, 0));
            }
        }
        all.sort_unstable();
        assert_eq!(vec![1, 2, 3, 4, 5], all);

        sink.close().unwrap();
    }

    #[test]
    fn spilled_batches_respect_fixed_row_count() {
        let pool = Arc::new(QueuedPool::default());
        let (mut sink, manager, _query) = make_sink(true, pool.clone());

        // First non-empty batch fixes the spill batch row count at 3, even
        // though later batches are larger.
        sink.sink(make_i64_batch([7, 3, 5]), false).unwrap();
        sink.sink(make_i64_batch([8, 1, 6, 2, 4]), false).unwrap();
        sink.revoke_memory().unwrap();
        pool.run_all();

        let state = manager.stream_state(0);
        let appends = state.appends.lock();
        let sizes: Vec<_> = appends.iter().map(|(batch, _)| batch.num_rows()).collect();
        let lasts: Vec<_> = appends.iter().map(|(_, last)| *last).collect();
        assert_eq!(vec![3, 3, 2], sizes);
        assert_eq!(vec![false, false, true], lasts);

        let rows: Vec<_> = appends
            .iter()
            .flat_map(|(batch, _)| collect_i64_column(batch, 0))
            .collect();
        assert_eq!(vec![1, 2, 3, 4, 5, 6, 7, 8], rows);
    }

    #[test]
    fn eos_with_no_data_finishes_inline() {
        let pool = Arc::new(QueuedPool::default());
        let (mut sink, _manager, _query) = make_sink(true, pool.clone());

        sink.sink(make_i64_batch([]), true).unwrap();

        assert_eq!(0, pool.pending(), "no drain should be scheduled");
        assert!(sink.read_dependency().is_ready());
        assert!(sink.finish_dependency().is_ready());
        assert_eq!(0, sink.spilled_run_count());

        let (batch, last) = sink.read_direct_next(16).unwrap();
        assert!(last);
        assert_eq!(0, batch.num_rows());
        sink.close().unwrap();
    }

    #[test]
    fn registration_failure_rolls_back() {
        let pool = Arc::new(QueuedPool::default());
        let (mut sink, manager, _query) = make_sink(true, pool.clone());

        sink.sink(make_i64_batch([4, 2]), false).unwrap();
        manager.fail_register.store(true, Ordering::SeqCst);

        let err = sink.revoke_memory().unwrap_err();
        assert!(err.to_string().contains("simulated register failure"));

        // Data stays resident and the sink keeps working.
        assert!(!sink.is_spilling());
        assert!(sink.sink_dependency().is_ready());
        assert!(sink.revocable_mem_size() > 0);
        assert_eq!(0, pool.pending());

        manager.fail_register.store(false, Ordering::SeqCst);
        sink.sink(make_i64_batch([7]), true).unwrap();
        pool.run_all();

        assert_eq!(1, sink.spilled_run_count());
        assert_eq!(vec![2, 4, 7], run_rows(&manager.stream_state(0)));
        sink.close().unwrap();
    }

    #[test]
    fn pool_rejection_rolls_back() {
        let (mut sink, _manager, _query) = make_sink(true, Arc::new(RejectingPool));

        sink.sink(make_i64_batch([1, 2]), false).unwrap();
        let err = sink.revoke_memory().unwrap_err();
        assert!(err.to_string().contains("simulated pool rejection"));

        assert!(!sink.is_spilling());
        assert!(sink.sink_dependency().is_ready());
        assert!(sink.revocable_mem_size() > 0);
        // Not a latched failure.
        sink.close().unwrap();
    }

    #[test]
    fn drain_failure_clears_runs_and_latches_status() {
        let pool = Arc::new(QueuedPool::default());
        let (mut sink, manager, _query) = make_sink(true, pool.clone());

        sink.sink(make_i64_batch([3, 1]), false).unwrap();
        sink.revoke_memory().unwrap();
        pool.run_all();
        assert_eq!(1, sink.spilled_run_count());

        sink.sink(make_i64_batch([4, 6]), false).unwrap();
        *manager.fail_on_append.lock() = Some(0);
        sink.revoke_memory().unwrap();
        pool.run_all();

        // All runs are discarded, not just the failed one.
        assert_eq!(0, sink.spilled_run_count());
        assert!(!sink.is_spilling());
        assert!(sink.sink_dependency().is_ready());

        // The failed stream was finalized with the failure status.
        let second = manager.stream_state(1);
        assert!(second.finalized.lock().as_ref().unwrap().is_err());
        assert!(second.discarded.load(Ordering::SeqCst));

        // The failure is latched for every later call.
        assert_eq!(usize::MAX, sink.revocable_mem_size());
        let err = sink.sink(make_i64_batch([9]), false).unwrap_err();
        assert!(err.to_string().contains("simulated append failure"));
        let err = sink.close().unwrap_err();
        assert!(err.message().contains("simulated append failure"));
    }

    #[test]
    fn cancel_mid_drain_discards_runs_without_failing() {
        let pool = Arc::new(QueuedPool::default());
        let (mut sink, manager, query) = make_sink(true, pool.clone());

        sink.sink(make_i64_batch([5, 1]), false).unwrap();
        // Cancel fires during the first append of the final drain.
        *manager.cancel_on_append.lock() = Some((0, query.clone()));
        sink.sink(make_i64_batch([2, 6]), true).unwrap();
        pool.run_all();

        assert!(query.is_canceled());
        assert_eq!(0, sink.spilled_run_count());
        assert!(manager.stream_state(0).discarded.load(Ordering::SeqCst));

        // Teardown still completes so the pipeline can unwind.
        assert!(sink.read_dependency().is_ready());
        assert!(sink.finish_dependency().is_ready());
        sink.close().unwrap();
    }

    #[test]
    #[should_panic(expected = "spill already in flight")]
    fn revoke_while_spilling_panics() {
        let pool = Arc::new(QueuedPool::default());
        let (mut sink, _manager, _query) = make_sink(true, pool);

        sink.sink(make_i64_batch([1]), false).unwrap();
        sink.revoke_memory().unwrap();
        sink.revoke_memory().unwrap();
    }

    #[test]
    fn accept_failure_latches_status() {
        let query = Arc::new(QueryContext::new());
        let manager = Arc::new(FakeSpillManager::new(Arc::new(InlinePool)));
        let mut sink = SpillSortSink::new(
            SpillSortProps {
                operator_id: 1,
                enable_spill: true,
            },
            // Key column the input does not have.
            &[SortExpr {
                column: 5,
                desc: false,
                nulls_first: false,
            }],
            query,
            manager,
        );

        sink.sink(make_i64_batch([1, 2]), false).unwrap_err();

        assert_eq!(usize::MAX, sink.revocable_mem_size());
        sink.sink(make_i64_batch([3]), false).unwrap_err();
        sink.close().unwrap_err();
    }

    #[test]
    fn close_waits_for_inflight_spill() {
        let (mut sink, manager, _query) = make_sink(true, Arc::new(SpawnPool));

        sink.sink(make_i64_batch([3, 1, 4, 2]), false).unwrap();
        *manager.append_delay.lock() = Some(Duration::from_millis(50));
        sink.revoke_memory().unwrap();

        // The drain runs on another thread; close must observe its result.
        sink.close().unwrap();
        assert!(!sink.is_spilling());
        assert_eq!(1, sink.spilled_run_count());
        assert_eq!(vec![1, 2, 3, 4], run_rows(&manager.stream_state(0)));
    }

    #[test]
    fn revocable_size_is_zero_when_spill_disabled() {
        let (mut sink, _manager, _query) = make_sink(false, Arc::new(InlinePool));
        sink.sink(make_i64_batch([1, 2, 3]), false).unwrap();
        assert_eq!(0, sink.revocable_mem_size());
    }
}
