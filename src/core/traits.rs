//! Collaborator traits for the loading core
//!
//! The core never talks to a database, a clock or a chat service directly.
//! It is handed implementations of these traits at construction time, which
//! keeps the batch logic testable with in-process stubs.

use crate::types::{OrderRow, ProcessingSummary, StorageError};
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Destination for converted rows
///
/// Each call is its own unit of work: there is no transaction spanning
/// several batches, so rows from earlier successful calls stay written when
/// a later call fails.
#[async_trait]
pub trait StorageWriter: Send + Sync {
    /// Write `rows` to `table`
    ///
    /// # Returns
    ///
    /// The number of rows the backend reports as inserted.
    ///
    /// # Errors
    ///
    /// `StorageError::OutOfMemory` triggers batch halving in the processor;
    /// every other variant is retried with backoff by the inserter.
    async fn write_batch(&self, table: &str, rows: &[OrderRow]) -> Result<usize, StorageError>;
}

/// Receiver for human-readable progress messages
///
/// Fire-and-forget: implementations must not block and have no way to fail.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, message: &str) {
        self(message)
    }
}

/// Forwards progress messages to the `tracing` subscriber
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, message: &str) {
        tracing::info!(target: "order_batch_loader::progress", "{}", message);
    }
}

/// Time source for backoff delays and timing
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Suspend the calling task for `duration` without blocking the thread
    async fn sleep(&self, duration: Duration);
}

/// Wall clock backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Hook for announcing a finished run (chat message, shared file link, ...)
///
/// Delivery belongs to the notifier; a failed notification must not turn a
/// finished run into a failed one, so this returns nothing.
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, summary: &ProcessingSummary);
}

/// Notifier that writes the completion message to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl CompletionNotifier for LogNotifier {
    async fn notify(&self, summary: &ProcessingSummary) {
        let title = if summary.cancelled {
            "Order load cancelled"
        } else if summary.failed() == 0 {
            "Order load complete"
        } else {
            "Order load complete with failures"
        };

        tracing::info!(
            table = %summary.table,
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            success_rate = %format!("{:.1}", summary.success_rate()),
            "{}",
            title
        );
    }
}
