//! Dataset processing
//!
//! The `DatasetProcessor` drives a whole run: it resolves the destination,
//! picks a starting batch size, slices the input, hands each slice to the
//! [`BatchInserter`], and folds the results into one [`ProcessingSummary`].
//!
//! # Run loop
//!
//! ```text
//! pending slices (OOM retries first, then fresh offsets)
//!     │  up to in_flight_limit slices, each no wider than the current size
//!     ▼
//! wave ──► insert_batch × N (join_all) ──► outcomes
//!     │
//!     ├── completed    → add counts, sample memory, adjust size, report progress
//!     ├── out-of-memory → halve size (once per wave), retry the same offsets next (bounded)
//!     ├── failed        → count the whole slice failed, move on
//!     └── cancelled     → stop after this wave, slice not counted
//! ```
//!
//! Sequential mode is a wave of one, so a retried offset is always the next
//! one written. In parallel mode the counters are only touched after a wave
//! completes, and the batch size is guarded by the sizer's own lock.
//!
//! Rows written by completed batches stay written if the run stops early:
//! there is no transaction spanning batches.

use crate::config::LoaderConfig;
use crate::core::batch_sizer::AdaptiveBatchSizer;
use crate::core::inserter::{Batch, BatchInserter, InsertError};
use crate::core::memory::{MemoryMonitor, SystemMemoryMonitor};
use crate::core::table_name::TableNameResolver;
use crate::core::traits::{Clock, ProgressSink, StorageWriter, TokioClock};
use crate::core::validator::is_valid_record;
use crate::types::{InsertCounts, LoaderError, OrderRecord, ProcessingSummary};
use futures::future::join_all;
use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Failure rate (percent) above which a finished run is flagged
pub const FAILURE_RATE_WARNING_PERCENT: f64 = 5.0;

/// Every this many completed batches, log a fresh memory sample
const MEMORY_CHECKPOINT_INTERVAL: usize = 10;

/// Offsets still waiting to be written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingSlice {
    start: usize,
    end: usize,
    /// Out-of-memory rounds already spent on these offsets
    oom_attempts: u32,
}

impl PendingSlice {
    fn len(&self) -> usize {
        self.end - self.start
    }
}

/// How one dispatched slice ended
#[derive(Debug)]
enum BatchOutcome {
    Completed(InsertCounts),
    OutOfMemory,
    Cancelled,
    Failed(String),
}

/// Mutable bookkeeping for a single run
#[derive(Debug, Default)]
struct RunState {
    total: usize,
    /// Next offset never handed out yet
    cursor: usize,
    /// Records counted so far (success or failure)
    processed: usize,
    counts: InsertCounts,
    batches: usize,
    next_index: usize,
    retry_queue: VecDeque<PendingSlice>,
    /// Out-of-memory slices of the current wave, in offset order
    requeue: Vec<PendingSlice>,
    /// The size was already halved for an out-of-memory in this wave
    halved_in_wave: bool,
    cancelled: bool,
}

impl RunState {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.processed as f64 * 100.0 / self.total as f64
        }
    }
}

/// Orchestrates adaptive batch loading of an order dataset
pub struct DatasetProcessor {
    resolver: TableNameResolver,
    sizer: AdaptiveBatchSizer,
    inserter: BatchInserter,
    memory: Arc<dyn MemoryMonitor>,
    clock: Arc<dyn Clock>,
    in_flight_limit: usize,
    max_oom_retries: u32,
}

impl DatasetProcessor {
    /// Build a processor writing to `storage`
    ///
    /// Uses the system memory monitor and the tokio clock; swap them with
    /// [`with_memory_monitor`](Self::with_memory_monitor) and
    /// [`with_clock`](Self::with_clock).
    ///
    /// # Errors
    ///
    /// Any configuration problem: invalid bounds or manual size, or a
    /// default/alias table that fails the naming policy.
    pub fn new(config: &LoaderConfig, storage: Arc<dyn StorageWriter>) -> Result<Self, LoaderError> {
        config.validate()?;

        let resolver =
            TableNameResolver::new(&config.default_table, config.table_aliases.clone())?;

        let sizer = AdaptiveBatchSizer::new(config.batch_limits, config.memory_threshold_mb);
        if let Some(size) = config.manual_batch_size {
            sizer.set_manual(size)?;
        }

        let clock: Arc<dyn Clock> = Arc::new(TokioClock);

        Ok(Self {
            resolver,
            sizer,
            inserter: BatchInserter::new(storage, Arc::clone(&clock), config.retry),
            memory: Arc::new(SystemMemoryMonitor::new(config.fallback_available_mb)),
            clock,
            in_flight_limit: config.in_flight_limit(),
            max_oom_retries: config.max_oom_retries,
        })
    }

    pub fn with_memory_monitor(mut self, memory: Arc<dyn MemoryMonitor>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.inserter = self.inserter.with_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    pub fn batch_sizer(&self) -> &AdaptiveBatchSizer {
        &self.sizer
    }

    /// Pin the batch size for subsequent runs
    pub fn set_batch_size(&self, size: usize) -> Result<(), LoaderError> {
        self.sizer.set_manual(size)
    }

    /// Load `records` into storage
    ///
    /// # Arguments
    ///
    /// * `records` - The full order collection, in input order
    /// * `progress` - Receives human-readable progress messages
    /// * `table_override` - Destination table or `@alias`; `None` uses the default
    /// * `cancel` - Checked before every wave and during retry backoff
    ///
    /// # Returns
    ///
    /// The run summary. Per-record and per-batch failures are counted in it,
    /// never returned as errors.
    ///
    /// # Errors
    ///
    /// - `LoaderError::InvalidTableName` before any batch is attempted
    /// - `LoaderError::Orchestration` if the run's own bookkeeping breaks
    pub async fn process_dataset(
        &self,
        records: &[OrderRecord],
        progress: &dyn ProgressSink,
        table_override: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ProcessingSummary, LoaderError> {
        let started = self.clock.now();
        let table = self.resolver.resolve(table_override)?;

        if records.is_empty() {
            info!(table = %table, "No orders to load");
            progress.report("No orders to load");
            return Ok(ProcessingSummary::empty(table, self.sizer.current()));
        }

        let available_mb = self.memory.available_mb();
        let batch_size = self.sizer.initial_size(available_mb);
        let valid = records.iter().filter(|r| is_valid_record(r)).count();

        info!(
            table = %table,
            records = records.len(),
            valid,
            invalid = records.len() - valid,
            batch_size,
            available_mb,
            in_flight = self.in_flight_limit,
            "Starting dataset load"
        );
        progress.report(&format!(
            "Loading {} orders into '{}' ({} valid, {} invalid), batch size {}",
            records.len(),
            table,
            valid,
            records.len() - valid,
            batch_size
        ));

        let mut run = RunState::new(records.len());
        if let Err(e) = self
            .run_batches(records, &table, progress, cancel, &mut run)
            .await
        {
            error!(
                table = %table,
                processed = run.processed,
                total = run.total,
                error = %e,
                "Dataset load aborted"
            );
            return Err(e);
        }

        let summary = ProcessingSummary {
            table,
            counts: run.counts,
            total_records: run.total,
            batches: run.batches,
            final_batch_size: self.sizer.current(),
            cancelled: run.cancelled,
            elapsed: self.clock.now().duration_since(started),
        };
        self.report_summary(&summary, progress);

        Ok(summary)
    }

    async fn run_batches(
        &self,
        records: &[OrderRecord],
        table: &str,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
        run: &mut RunState,
    ) -> Result<(), LoaderError> {
        loop {
            if cancel.is_cancelled() {
                run.cancelled = true;
                warn!(
                    processed = run.processed,
                    total = run.total,
                    "Cancellation requested, stopping before next batch"
                );
                break;
            }

            let wave = self.next_wave(run);
            if wave.is_empty() {
                break;
            }

            let mut batches = Vec::with_capacity(wave.len());
            for slice in &wave {
                let slice_records = records.get(slice.start..slice.end).ok_or_else(|| {
                    LoaderError::orchestration(format!(
                        "slice {}..{} outside input of {} records",
                        slice.start, slice.end, run.total
                    ))
                })?;
                batches.push(Batch::new(run.next_index, slice.start, slice_records));
                run.next_index += 1;
            }

            let outcomes = join_all(
                batches
                    .iter()
                    .map(|batch| self.run_batch(batch, table, cancel)),
            )
            .await;

            run.halved_in_wave = false;
            for ((slice, batch), outcome) in wave.into_iter().zip(&batches).zip(outcomes) {
                self.apply_outcome(slice, batch.index, outcome, progress, run)?;
            }

            // Failed pieces go back ahead of their own remainders
            for slice in run.requeue.drain(..).rev() {
                run.retry_queue.push_front(slice);
            }

            if run.cancelled {
                break;
            }
        }

        if !run.cancelled && run.processed != run.total {
            return Err(LoaderError::orchestration(format!(
                "run finished with {} of {} records accounted for",
                run.processed, run.total
            )));
        }

        Ok(())
    }

    /// Pick the next slices to dispatch
    ///
    /// Requeued out-of-memory slices go first and are cut down to the
    /// current size; fresh offsets follow. A cut-off remainder starts its
    /// own out-of-memory count from zero.
    fn next_wave(&self, run: &mut RunState) -> Vec<PendingSlice> {
        let mut wave = Vec::with_capacity(self.in_flight_limit);

        while wave.len() < self.in_flight_limit {
            let width = self.sizer.current();

            let slice = if let Some(mut pending) = run.retry_queue.pop_front() {
                if pending.len() > width {
                    run.retry_queue.push_front(PendingSlice {
                        start: pending.start + width,
                        end: pending.end,
                        oom_attempts: 0,
                    });
                    pending.end = pending.start + width;
                }
                pending
            } else if run.cursor < run.total {
                let end = (run.cursor + width).min(run.total);
                let fresh = PendingSlice {
                    start: run.cursor,
                    end,
                    oom_attempts: 0,
                };
                run.cursor = end;
                fresh
            } else {
                break;
            };

            wave.push(slice);
        }

        wave
    }

    /// Run one batch, turning every way it can end into an outcome
    ///
    /// A panic inside the storage call is caught here so that one bad batch
    /// cannot take the run down.
    async fn run_batch(
        &self,
        batch: &Batch<'_>,
        table: &str,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let insert = self.inserter.insert_batch(batch, table, cancel);

        match AssertUnwindSafe(insert).catch_unwind().await {
            Ok(Ok(counts)) => BatchOutcome::Completed(counts),
            Ok(Err(InsertError::OutOfMemory { .. })) => BatchOutcome::OutOfMemory,
            Ok(Err(InsertError::Cancelled { .. })) => BatchOutcome::Cancelled,
            Ok(Err(e @ InsertError::InconsistentWrite { .. })) => BatchOutcome::Failed(e.to_string()),
            Err(panic) => BatchOutcome::Failed(panic_message(panic.as_ref())),
        }
    }

    fn apply_outcome(
        &self,
        mut slice: PendingSlice,
        index: usize,
        outcome: BatchOutcome,
        progress: &dyn ProgressSink,
        run: &mut RunState,
    ) -> Result<(), LoaderError> {
        match outcome {
            BatchOutcome::Completed(counts) => {
                if counts.total() != slice.len() {
                    return Err(LoaderError::orchestration(format!(
                        "batch {} reported {} results for {} records",
                        index,
                        counts.total(),
                        slice.len()
                    )));
                }
                self.record_completed(slice, index, counts, progress, run);
            }
            BatchOutcome::OutOfMemory => {
                // One spike can fail several batches of a wave; shrink once for it
                let new_size = if run.halved_in_wave {
                    self.sizer.current()
                } else {
                    run.halved_in_wave = true;
                    self.sizer.halve_on_out_of_memory()
                };
                slice.oom_attempts += 1;

                if slice.oom_attempts > self.max_oom_retries {
                    error!(
                        batch = index,
                        start = slice.start,
                        end = slice.end,
                        attempts = slice.oom_attempts,
                        "Out of memory persists at this offset, counting slice as failed"
                    );
                    self.record_completed(
                        slice,
                        index,
                        InsertCounts::all_failed(slice.len()),
                        progress,
                        run,
                    );
                } else {
                    warn!(
                        batch = index,
                        start = slice.start,
                        end = slice.end,
                        batch_size = new_size,
                        attempt = slice.oom_attempts,
                        "Out of memory, retrying same offset with smaller batch"
                    );
                    progress.report(&format!(
                        "Out of memory at order {}, batch size reduced to {}",
                        slice.start, new_size
                    ));
                    run.requeue.push(slice);
                }
            }
            BatchOutcome::Failed(reason) => {
                error!(
                    batch = index,
                    start = slice.start,
                    end = slice.end,
                    reason = %reason,
                    "Batch failed unexpectedly, counting slice as failed"
                );
                self.record_completed(
                    slice,
                    index,
                    InsertCounts::all_failed(slice.len()),
                    progress,
                    run,
                );
            }
            BatchOutcome::Cancelled => {
                info!(
                    batch = index,
                    start = slice.start,
                    end = slice.end,
                    "Batch cancelled, not counted"
                );
                run.cancelled = true;
            }
        }

        Ok(())
    }

    fn record_completed(
        &self,
        slice: PendingSlice,
        index: usize,
        counts: InsertCounts,
        progress: &dyn ProgressSink,
        run: &mut RunState,
    ) {
        run.counts += counts;
        run.processed += slice.len();
        run.batches += 1;

        let used_mb = self.memory.used_mb();
        let (batch_size, changed) = self.sizer.adjust_for_memory_pressure(used_mb);
        if changed {
            info!(used_mb, batch_size, "Batch size adjusted for memory pressure");
        }

        progress.report(&format!(
            "Batch {}: {} stored, {} failed ({}/{} orders, {:.1}%)",
            index + 1,
            counts.succeeded,
            counts.failed,
            run.processed,
            run.total,
            run.percent_complete()
        ));

        // No collector to nudge; a fresh sample marks the checkpoint instead
        if run.batches % MEMORY_CHECKPOINT_INTERVAL == 0 {
            debug!(
                batches = run.batches,
                used_mb = self.memory.used_mb(),
                available_mb = self.memory.available_mb(),
                "Memory checkpoint"
            );
        }
    }

    fn report_summary(&self, summary: &ProcessingSummary, progress: &dyn ProgressSink) {
        let elapsed_ms = summary.elapsed.as_millis() as u64;

        if summary.cancelled {
            warn!(
                table = %summary.table,
                succeeded = summary.succeeded(),
                failed = summary.failed(),
                unprocessed = summary.unprocessed(),
                elapsed_ms,
                "Dataset load cancelled"
            );
        } else if summary.failure_rate() > FAILURE_RATE_WARNING_PERCENT {
            warn!(
                table = %summary.table,
                succeeded = summary.succeeded(),
                failed = summary.failed(),
                failure_rate = %format!("{:.1}", summary.failure_rate()),
                elapsed_ms,
                "Dataset load finished with high failure rate"
            );
        } else {
            info!(
                table = %summary.table,
                succeeded = summary.succeeded(),
                failed = summary.failed(),
                success_rate = %format!("{:.1}", summary.success_rate()),
                batches = summary.batches,
                elapsed_ms,
                "Dataset load finished"
            );
        }

        progress.report(&format!(
            "Finished: {} stored, {} failed ({:.1}% success){}",
            summary.succeeded(),
            summary.failed(),
            summary.success_rate(),
            if summary.cancelled { ", cancelled" } else { "" }
        ));
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionMode;
    use crate::core::memory::FixedMemoryMonitor;
    use crate::testing::{RecordingClock, ScriptedStorage};
    use crate::types::{OrderRow, StorageError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn orders(n: usize) -> Vec<OrderRecord> {
        (0..n)
            .map(|i| OrderRecord::new(format!("A-{}", i), "Kim", "12 Harbor Rd", "Tea", 1))
            .collect()
    }

    fn processor(
        config: LoaderConfig,
        storage: Arc<dyn StorageWriter>,
        memory: Arc<FixedMemoryMonitor>,
    ) -> DatasetProcessor {
        DatasetProcessor::new(&config, storage)
            .unwrap()
            .with_memory_monitor(memory)
            .with_clock(Arc::new(RecordingClock::new()))
    }

    fn quiet_memory() -> Arc<FixedMemoryMonitor> {
        Arc::new(FixedMemoryMonitor::new(300, 600))
    }

    fn collect_progress() -> (Arc<Mutex<Vec<String>>>, impl ProgressSink) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            move |message: &str| seen.lock().push(message.to_string())
        };
        (seen, sink)
    }

    #[tokio::test]
    async fn test_empty_input_returns_zero_counts() {
        let storage = Arc::new(ScriptedStorage::always_ok());
        let processor = processor(LoaderConfig::default(), storage.clone(), quiet_memory());
        let (seen, sink) = collect_progress();

        let summary = processor
            .process_dataset(&[], &sink, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.counts, InsertCounts::default());
        assert_eq!(summary.batches, 0);
        assert!(storage.calls().is_empty());
        assert_eq!(*seen.lock(), vec!["No orders to load".to_string()]);
    }

    #[tokio::test]
    async fn test_invalid_table_fails_before_any_write() {
        let storage = Arc::new(ScriptedStorage::always_ok());
        let processor = processor(LoaderConfig::default(), storage.clone(), quiet_memory());
        let (_, sink) = collect_progress();

        let result = processor
            .process_dataset(&orders(10), &sink, Some("DROP"), &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(LoaderError::InvalidTableName { .. })));
        assert!(storage.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rows_go_to_resolved_alias_table() {
        let mut config = LoaderConfig::default();
        config.table_aliases.insert("archive", "orders_archive");
        let storage = Arc::new(ScriptedStorage::always_ok());
        let processor = processor(config, storage.clone(), quiet_memory());
        let (_, sink) = collect_progress();

        let summary = processor
            .process_dataset(&orders(5), &sink, Some("@archive"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.table, "orders_archive");
        assert!(storage.calls().iter().all(|c| c.table == "orders_archive"));
    }

    #[tokio::test]
    async fn test_memory_pressure_shrinks_following_batches() {
        let storage = Arc::new(ScriptedStorage::always_ok());
        let memory = Arc::new(FixedMemoryMonitor::new(600, 600));
        let processor = processor(LoaderConfig::default(), storage.clone(), memory);
        let (_, sink) = collect_progress();

        let summary = processor
            .process_dataset(&orders(1000), &sink, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(storage.call_sizes(), vec![500, 375, 125]);
        assert_eq!(summary.counts, InsertCounts::new(1000, 0));
        assert_eq!(summary.final_batch_size, 210);
    }

    #[tokio::test]
    async fn test_plenty_of_memory_doubles_first_batch() {
        let storage = Arc::new(ScriptedStorage::always_ok());
        let memory = Arc::new(FixedMemoryMonitor::new(300, 4096));
        let processor = processor(LoaderConfig::default(), storage.clone(), memory);
        let (_, sink) = collect_progress();

        processor
            .process_dataset(&orders(1500), &sink, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(storage.call_sizes(), vec![1000, 500]);
    }

    #[tokio::test]
    async fn test_manual_batch_size_is_used() {
        let config = LoaderConfig {
            manual_batch_size: Some(100),
            ..LoaderConfig::default()
        };
        let storage = Arc::new(ScriptedStorage::always_ok());
        let memory = Arc::new(FixedMemoryMonitor::new(300, 4096));
        let processor = processor(config, storage.clone(), memory);
        let (_, sink) = collect_progress();

        processor
            .process_dataset(&orders(250), &sink, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(storage.call_sizes(), vec![100, 100, 50]);
    }

    #[tokio::test]
    async fn test_persistent_out_of_memory_is_bounded() {
        let config = LoaderConfig {
            max_oom_retries: 2,
            ..LoaderConfig::default()
        };
        let storage = Arc::new(ScriptedStorage::always_failing(StorageError::out_of_memory(
            "no room",
        )));
        let processor = processor(config, storage.clone(), quiet_memory());
        let (_, sink) = collect_progress();

        let summary = processor
            .process_dataset(&orders(40), &sink, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(storage.call_sizes(), vec![40, 40, 40]);
        assert_eq!(summary.counts, InsertCounts::all_failed(40));
        assert_eq!(summary.batches, 1);
    }

    struct PanicOnceStorage {
        panicked: AtomicBool,
        written: Mutex<usize>,
    }

    #[async_trait]
    impl StorageWriter for PanicOnceStorage {
        async fn write_batch(&self, _table: &str, rows: &[OrderRow]) -> Result<usize, StorageError> {
            if !self.panicked.swap(true, Ordering::SeqCst) {
                panic!("driver bug");
            }
            *self.written.lock() += rows.len();
            Ok(rows.len())
        }
    }

    #[tokio::test]
    async fn test_panicking_batch_counted_failed_and_run_continues() {
        let storage = Arc::new(PanicOnceStorage {
            panicked: AtomicBool::new(false),
            written: Mutex::new(0),
        });
        let processor = processor(LoaderConfig::default(), storage.clone(), quiet_memory());
        let (_, sink) = collect_progress();

        let summary = processor
            .process_dataset(&orders(600), &sink, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.counts, InsertCounts::new(100, 500));
        assert_eq!(*storage.written.lock(), 100);
    }

    #[tokio::test]
    async fn test_inconsistent_storage_counts_batch_failed() {
        let storage = Arc::new(ScriptedStorage::over_reporting(3));
        let processor = processor(LoaderConfig::default(), storage, quiet_memory());
        let (_, sink) = collect_progress();

        let summary = processor
            .process_dataset(&orders(20), &sink, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.counts, InsertCounts::all_failed(20));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_writes_nothing() {
        let storage = Arc::new(ScriptedStorage::always_ok());
        let processor = processor(LoaderConfig::default(), storage.clone(), quiet_memory());
        let (_, sink) = collect_progress();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = processor
            .process_dataset(&orders(100), &sink, None, &cancel)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.counts, InsertCounts::default());
        assert_eq!(summary.unprocessed(), 100);
        assert!(storage.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_during_retry_leaves_batch_uncounted() {
        let cancel = CancellationToken::new();
        let storage = Arc::new(ScriptedStorage::always_failing(StorageError::transient(
            "timeout",
        )));
        let processor = DatasetProcessor::new(&LoaderConfig::default(), storage.clone())
            .unwrap()
            .with_memory_monitor(quiet_memory())
            .with_clock(Arc::new(RecordingClock::cancelling_on_sleep(cancel.clone())));
        let (_, sink) = collect_progress();

        let summary = processor
            .process_dataset(&orders(800), &sink, None, &cancel)
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.counts, InsertCounts::default());
        assert_eq!(storage.call_sizes(), vec![500]);
    }

    #[tokio::test]
    async fn test_parallel_waves_cover_every_record_once() {
        let config = LoaderConfig {
            execution: ExecutionMode::Parallel,
            max_concurrent_batches: 4,
            ..LoaderConfig::default()
        };
        let storage = Arc::new(ScriptedStorage::always_ok());
        let processor = processor(config, storage.clone(), quiet_memory());
        let (_, sink) = collect_progress();

        let summary = processor
            .process_dataset(&orders(2300), &sink, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.counts, InsertCounts::new(2300, 0));
        assert_eq!(storage.rows_written(), 2300);
        assert_eq!(storage.call_sizes(), vec![500, 500, 500, 500, 300]);
    }

    #[tokio::test]
    async fn test_parallel_out_of_memory_requeues_offsets() {
        let config = LoaderConfig {
            execution: ExecutionMode::Parallel,
            max_concurrent_batches: 2,
            ..LoaderConfig::default()
        };
        let storage = Arc::new(ScriptedStorage::with_script(vec![Err(
            StorageError::out_of_memory("spike"),
        )]));
        let processor = processor(config, storage.clone(), quiet_memory());
        let (_, sink) = collect_progress();

        let summary = processor
            .process_dataset(&orders(1000), &sink, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.counts, InsertCounts::new(1000, 0));
        assert_eq!(storage.rows_written(), 1000);
        assert_eq!(storage.calls()[0].first_order.as_deref(), Some("A-0"));
        assert!(storage.calls()[1..]
            .iter()
            .any(|c| c.first_order.as_deref() == Some("A-0") && c.succeeded));
    }

    fn assert_successful_writes_contiguous(storage: &ScriptedStorage) {
        let mut offset = 0;
        for call in storage.calls().iter().filter(|c| c.succeeded) {
            assert_eq!(call.first_order, Some(format!("A-{}", offset)));
            offset += call.rows;
        }
    }

    #[tokio::test]
    async fn test_repeated_out_of_memory_retries_failed_offset_first() {
        let storage = Arc::new(ScriptedStorage::with_script(vec![
            Err(StorageError::out_of_memory("spike")),
            Err(StorageError::out_of_memory("spike")),
        ]));
        let processor = processor(LoaderConfig::default(), storage.clone(), quiet_memory());
        let (_, sink) = collect_progress();

        let summary = processor
            .process_dataset(&orders(1000), &sink, None, &CancellationToken::new())
            .await
            .unwrap();

        let calls = storage.calls();
        assert_eq!(calls[1].first_order.as_deref(), Some("A-0"));
        assert_eq!(calls[1].rows, 250);
        assert_eq!(calls[2].first_order.as_deref(), Some("A-0"));
        assert_eq!(calls[2].rows, 125);
        assert!(calls[2].succeeded);
        assert_successful_writes_contiguous(&storage);
        assert_eq!(summary.counts, InsertCounts::new(1000, 0));
    }

    #[tokio::test]
    async fn test_split_remainder_gets_its_own_out_of_memory_budget() {
        let config = LoaderConfig {
            max_oom_retries: 1,
            ..LoaderConfig::default()
        };
        let storage = Arc::new(ScriptedStorage::with_script(vec![
            Err(StorageError::out_of_memory("spike")),
            Ok(()),
            Err(StorageError::out_of_memory("spike")),
        ]));
        let processor = processor(config, storage.clone(), quiet_memory());
        let (_, sink) = collect_progress();

        let summary = processor
            .process_dataset(&orders(1000), &sink, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(storage.calls()[2].first_order.as_deref(), Some("A-250"));
        assert_eq!(summary.counts, InsertCounts::new(1000, 0));
        assert_successful_writes_contiguous(&storage);
    }

    #[tokio::test]
    async fn test_parallel_wave_halves_once_for_several_out_of_memory() {
        let config = LoaderConfig {
            execution: ExecutionMode::Parallel,
            max_concurrent_batches: 2,
            ..LoaderConfig::default()
        };
        let storage = Arc::new(ScriptedStorage::with_script(vec![
            Err(StorageError::out_of_memory("spike")),
            Err(StorageError::out_of_memory("spike")),
        ]));
        let processor = processor(config, storage.clone(), quiet_memory());
        let (_, sink) = collect_progress();

        let summary = processor
            .process_dataset(&orders(1000), &sink, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(storage.call_sizes(), vec![500, 500, 250, 250, 250, 250]);
        assert_eq!(processor.batch_sizer().current(), 250);
        assert_eq!(summary.counts, InsertCounts::new(1000, 0));
        assert_eq!(storage.rows_written(), 1000);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_batch_and_run_continues() {
        let transient =
            || -> Result<(), StorageError> { Err(StorageError::transient("connection reset")) };
        let storage = Arc::new(ScriptedStorage::with_script(vec![
            transient(),
            transient(),
            transient(),
            transient(),
        ]));
        let processor = processor(LoaderConfig::default(), storage.clone(), quiet_memory());
        let (_, sink) = collect_progress();

        let summary = processor
            .process_dataset(&orders(1200), &sink, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.counts, InsertCounts::new(700, 500));
        assert_eq!(summary.batches, 3);
        assert_eq!(storage.call_sizes(), vec![500, 500, 500, 500, 500, 200]);
        assert_eq!(storage.calls()[4].first_order.as_deref(), Some("A-500"));
        assert_eq!(storage.rows_written(), 700);
        assert!(!summary.cancelled);
    }

    #[tokio::test]
    async fn test_progress_reports_percent_complete() {
        let storage = Arc::new(ScriptedStorage::always_ok());
        let processor = processor(LoaderConfig::default(), storage, quiet_memory());
        let (seen, sink) = collect_progress();

        processor
            .process_dataset(&orders(1000), &sink, None, &CancellationToken::new())
            .await
            .unwrap();

        let seen = seen.lock();
        assert!(seen.iter().any(|m| m.contains("(500/1000 orders, 50.0%)")));
        assert!(seen.iter().any(|m| m.contains("(1000/1000 orders, 100.0%)")));
        assert!(seen.last().unwrap().starts_with("Finished: 1000 stored, 0 failed"));
    }
}
