//! Batch insertion with retry
//!
//! One call to [`BatchInserter::insert_batch`] takes a slice of orders all the
//! way to storage:
//!
//! 1. orders failing validation are counted as failures and dropped
//! 2. the rest are converted; rows failing validation are dropped the same way
//! 3. with nothing left to write, the whole batch counts as failed
//! 4. otherwise the rows are written
//!
//! A failed write is retried up to `max_retries` times after waiting 1s, 2s,
//! 4s (by default); each retry redoes steps 1-4. When every attempt fails the
//! whole batch counts as failed, including records that were valid.
//!
//! Out-of-memory is not retried here. It goes back to the processor, which
//! halves the batch size and re-slices the same offset.

use crate::config::RetryPolicy;
use crate::core::converter::to_storage_row;
use crate::core::traits::{Clock, StorageWriter};
use crate::core::validator::{is_valid_record, is_valid_row};
use crate::types::{InsertCounts, OrderRecord, OrderRow, StorageError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A contiguous slice of the input handed to the inserter
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    /// Ordinal of this batch within the run
    pub index: usize,
    /// Offset of the first record in the input collection
    pub start: usize,
    pub records: &'a [OrderRecord],
}

impl<'a> Batch<'a> {
    pub fn new(index: usize, start: usize, records: &'a [OrderRecord]) -> Self {
        Self {
            index,
            start,
            records,
        }
    }

    /// Offset one past the last record
    pub fn end(&self) -> usize {
        self.start + self.records.len()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Ways a batch can end without producing counts
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InsertError {
    /// The write ran out of memory; the processor should shrink and retry
    #[error("batch {batch} ran out of memory: {source}")]
    OutOfMemory { batch: usize, source: StorageError },

    /// Cancellation arrived while the batch was waiting to retry
    #[error("batch {batch} cancelled before retry {retry}")]
    Cancelled { batch: usize, retry: u32 },

    /// Storage claimed more inserted rows than it was given
    #[error("batch {batch}: storage reported {reported} rows inserted but {sent} were sent")]
    InconsistentWrite {
        batch: usize,
        reported: usize,
        sent: usize,
    },
}

/// Rows ready for one write attempt plus what was filtered out
#[derive(Debug, Default)]
struct PreparedRows {
    rows: Vec<OrderRow>,
    invalid_records: usize,
    invalid_rows: usize,
}

fn prepare_rows(records: &[OrderRecord]) -> PreparedRows {
    let mut prepared = PreparedRows {
        rows: Vec::with_capacity(records.len()),
        ..PreparedRows::default()
    };

    for record in records {
        if !is_valid_record(record) {
            prepared.invalid_records += 1;
            continue;
        }

        let row = to_storage_row(record);
        if is_valid_row(&row) {
            prepared.rows.push(row);
        } else {
            prepared.invalid_rows += 1;
        }
    }

    prepared
}

/// Validates, converts and writes batches, retrying failed writes
#[derive(Clone)]
pub struct BatchInserter {
    storage: Arc<dyn StorageWriter>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl BatchInserter {
    pub fn new(storage: Arc<dyn StorageWriter>, clock: Arc<dyn Clock>, retry: RetryPolicy) -> Self {
        Self {
            storage,
            clock,
            retry,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Insert one batch into `table`
    ///
    /// # Returns
    ///
    /// Success and failure counts that always add up to the batch length.
    ///
    /// # Errors
    ///
    /// - `InsertError::OutOfMemory` as soon as a write reports it
    /// - `InsertError::Cancelled` if `cancel` fires before a retry
    /// - `InsertError::InconsistentWrite` if storage over-reports inserted rows
    pub async fn insert_batch(
        &self,
        batch: &Batch<'_>,
        table: &str,
        cancel: &CancellationToken,
    ) -> Result<InsertCounts, InsertError> {
        let batch_len = batch.len();
        let started = self.clock.now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if attempt > 1 && cancel.is_cancelled() {
                return Err(InsertError::Cancelled {
                    batch: batch.index,
                    retry: attempt - 1,
                });
            }

            let prepared = prepare_rows(batch.records);
            debug!(
                batch = batch.index,
                attempt,
                records = batch_len,
                valid_rows = prepared.rows.len(),
                invalid_records = prepared.invalid_records,
                invalid_rows = prepared.invalid_rows,
                "Batch converted"
            );

            if prepared.rows.is_empty() {
                warn!(
                    batch = batch.index,
                    records = batch_len,
                    "No valid rows in batch, skipping write"
                );
                return Ok(InsertCounts::all_failed(batch_len));
            }

            let write_started = self.clock.now();
            let result = self.storage.write_batch(table, &prepared.rows).await;
            let write_ms = self.clock.now().duration_since(write_started).as_millis() as u64;

            match result {
                Ok(inserted) => {
                    if inserted > prepared.rows.len() {
                        return Err(InsertError::InconsistentWrite {
                            batch: batch.index,
                            reported: inserted,
                            sent: prepared.rows.len(),
                        });
                    }

                    let counts = InsertCounts::new(inserted, batch_len - inserted);
                    info!(
                        batch = batch.index,
                        table = %table,
                        attempt,
                        succeeded = counts.succeeded,
                        failed = counts.failed,
                        write_ms,
                        elapsed_ms = self.clock.now().duration_since(started).as_millis() as u64,
                        "Batch written"
                    );
                    return Ok(counts);
                }
                Err(e) if e.is_out_of_memory() => {
                    warn!(
                        batch = batch.index,
                        attempt,
                        rows = prepared.rows.len(),
                        error = %e,
                        "Write ran out of memory"
                    );
                    return Err(InsertError::OutOfMemory {
                        batch: batch.index,
                        source: e,
                    });
                }
                Err(e) => {
                    if attempt > self.retry.max_retries {
                        error!(
                            batch = batch.index,
                            table = %table,
                            attempts = attempt,
                            start = batch.start,
                            end = batch.end(),
                            error = %e,
                            elapsed_ms = self.clock.now().duration_since(started).as_millis() as u64,
                            "Batch write failed after all retries, counting batch as failed"
                        );
                        return Ok(InsertCounts::all_failed(batch_len));
                    }

                    let delay = self.retry.delay_before_retry(attempt);
                    warn!(
                        batch = batch.index,
                        attempt,
                        max_attempts = self.retry.total_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Batch write failed, retrying"
                    );

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            info!(batch = batch.index, retry = attempt, "Retry abandoned on cancellation");
                            return Err(InsertError::Cancelled {
                                batch: batch.index,
                                retry: attempt,
                            });
                        }
                        _ = self.clock.sleep(delay) => {}
                    }
                }
            }
        }
    }
}
