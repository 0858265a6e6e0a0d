//! In-process collaborators for tests and benchmarks
//!
//! `ScriptedStorage` answers write calls from a script and records what it
//! was asked to write; `RecordingClock` records backoff delays instead of
//! sleeping through them.

use crate::core::traits::{Clock, StorageWriter};
use crate::types::{OrderRow, StorageError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// One observed `write_batch` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    pub table: String,
    pub rows: usize,
    /// Order number of the first row, to tell which offset was written
    pub first_order: Option<String>,
    pub succeeded: bool,
}

/// Storage stub driven by a per-call script
///
/// Calls consume the script front to back; once it is empty every call gets
/// the fallback outcome (success unless built with `always_failing`).
#[derive(Debug)]
pub struct ScriptedStorage {
    script: Mutex<VecDeque<Result<(), StorageError>>>,
    fallback: Option<StorageError>,
    over_report: usize,
    calls: Mutex<Vec<WriteCall>>,
}

impl ScriptedStorage {
    fn build(
        script: Vec<Result<(), StorageError>>,
        fallback: Option<StorageError>,
        over_report: usize,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            over_report,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Every write succeeds
    pub fn always_ok() -> Self {
        Self::build(Vec::new(), None, 0)
    }

    /// Every write fails with `error`
    pub fn always_failing(error: StorageError) -> Self {
        Self::build(Vec::new(), Some(error), 0)
    }

    /// Writes follow `script`, then succeed
    pub fn with_script(script: Vec<Result<(), StorageError>>) -> Self {
        Self::build(script, None, 0)
    }

    /// Writes succeed but claim `extra` more rows than were sent
    pub fn over_reporting(extra: usize) -> Self {
        Self::build(Vec::new(), None, extra)
    }

    pub fn calls(&self) -> Vec<WriteCall> {
        self.calls.lock().clone()
    }

    /// Row counts of every call, in order
    pub fn call_sizes(&self) -> Vec<usize> {
        self.calls.lock().iter().map(|c| c.rows).collect()
    }

    /// Rows accepted across all successful calls
    pub fn rows_written(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.succeeded)
            .map(|c| c.rows)
            .sum()
    }
}

#[async_trait]
impl StorageWriter for ScriptedStorage {
    async fn write_batch(&self, table: &str, rows: &[OrderRow]) -> Result<usize, StorageError> {
        let outcome = match self.script.lock().pop_front() {
            Some(outcome) => outcome,
            None => match &self.fallback {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            },
        };

        self.calls.lock().push(WriteCall {
            table: table.to_string(),
            rows: rows.len(),
            first_order: rows.first().map(|r| r.order_number.clone()),
            succeeded: outcome.is_ok(),
        });

        // Let other batches of a parallel wave make progress
        tokio::task::yield_now().await;

        outcome.map(|()| rows.len() + self.over_report)
    }
}

/// Clock that records requested sleeps and returns at once
#[derive(Debug, Default)]
pub struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
    cancel_on_sleep: Option<CancellationToken>,
}

impl RecordingClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// A clock that fires `token` the first time anything sleeps on it
    pub fn cancelling_on_sleep(token: CancellationToken) -> Self {
        Self {
            sleeps: Mutex::new(Vec::new()),
            cancel_on_sleep: Some(token),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Clock for RecordingClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        if let Some(token) = &self.cancel_on_sleep {
            token.cancel();
        }
    }
}
