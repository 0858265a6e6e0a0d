//! Result counters for batches and whole runs

use std::ops::{Add, AddAssign};
use std::time::Duration;

/// Success and failure counts for one batch or an aggregate of batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertCounts {
    pub succeeded: usize,
    pub failed: usize,
}

impl InsertCounts {
    pub fn new(succeeded: usize, failed: usize) -> Self {
        Self { succeeded, failed }
    }

    /// Every record of a batch of `len` counted as failed
    pub fn all_failed(len: usize) -> Self {
        Self {
            succeeded: 0,
            failed: len,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

impl Add for InsertCounts {
    type Output = InsertCounts;

    fn add(self, rhs: InsertCounts) -> InsertCounts {
        InsertCounts {
            succeeded: self.succeeded + rhs.succeeded,
            failed: self.failed + rhs.failed,
        }
    }
}

impl AddAssign for InsertCounts {
    fn add_assign(&mut self, rhs: InsertCounts) {
        self.succeeded += rhs.succeeded;
        self.failed += rhs.failed;
    }
}

/// Outcome of one dataset run
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingSummary {
    /// Table the rows were written to
    pub table: String,
    /// Aggregate counts over every completed batch
    pub counts: InsertCounts,
    /// Size of the input collection
    pub total_records: usize,
    /// Batches that completed (retries in place are not counted twice)
    pub batches: usize,
    /// Batch size in effect when the run ended
    pub final_batch_size: usize,
    /// The run stopped early on request
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl ProcessingSummary {
    /// Summary for a run that had nothing to do
    pub fn empty(table: impl Into<String>, batch_size: usize) -> Self {
        Self {
            table: table.into(),
            counts: InsertCounts::default(),
            total_records: 0,
            batches: 0,
            final_batch_size: batch_size,
            cancelled: false,
            elapsed: Duration::ZERO,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.counts.succeeded
    }

    pub fn failed(&self) -> usize {
        self.counts.failed
    }

    /// Records never counted either way (only non-zero after cancellation)
    pub fn unprocessed(&self) -> usize {
        self.total_records.saturating_sub(self.counts.total())
    }

    /// Percentage of counted records that were stored
    pub fn success_rate(&self) -> f64 {
        match self.counts.total() {
            0 => 0.0,
            total => self.counts.succeeded as f64 * 100.0 / total as f64,
        }
    }

    /// Percentage of counted records that failed
    pub fn failure_rate(&self) -> f64 {
        match self.counts.total() {
            0 => 0.0,
            total => self.counts.failed as f64 * 100.0 / total as f64,
        }
    }
}
