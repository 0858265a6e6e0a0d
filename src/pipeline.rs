//! End-to-end loader run
//!
//! Ties the pieces together for the binary:
//!
//! 1. build a tokio multi-threaded runtime
//! 2. read the order CSV (on the blocking pool)
//! 3. build the storage backend and the `DatasetProcessor`
//! 4. run the load, with Ctrl-C wired to the cancellation token
//! 5. announce the result through the notifier
//! 6. write the summary CSV to `output`

use crate::config::LoaderConfig;
use crate::core::traits::{CompletionNotifier, StorageWriter, TracingProgress};
use crate::core::DatasetProcessor;
use crate::io::{read_orders, write_summary_csv, CsvTableStorage, MemoryStorage};
use crate::types::{LoaderError, ProcessingSummary};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Where converted rows end up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageTarget {
    /// One CSV file per table in this directory
    Directory(PathBuf),
    /// Discarded after the run
    Memory,
}

/// Per-run inputs that are not part of the loader configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub input: PathBuf,
    /// Table name or `@alias`; `None` loads into the default table
    pub table: Option<String>,
    pub storage: StorageTarget,
}

/// Run a complete load and write its summary to `output`
///
/// # Errors
///
/// Configuration, input and orchestration errors. Failed records and
/// batches are reported in the summary instead.
pub fn run(
    config: &LoaderConfig,
    options: &RunOptions,
    notifier: &dyn CompletionNotifier,
    output: &mut dyn Write,
) -> Result<ProcessingSummary, LoaderError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.max_concurrent_batches.max(1))
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let cancel = CancellationToken::new();
        let interrupt = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

        let result = load(config, options, &cancel).await;
        interrupt.abort();
        let summary = result?;

        notifier.notify(&summary).await;
        write_summary_csv(&summary, output)?;

        Ok(summary)
    })
}

/// Read, build and process; the async part of [`run`]
pub async fn load(
    config: &LoaderConfig,
    options: &RunOptions,
    cancel: &CancellationToken,
) -> Result<ProcessingSummary, LoaderError> {
    let input = options.input.clone();
    let orders = tokio::task::spawn_blocking(move || read_orders(&input))
        .await
        .map_err(|e| LoaderError::orchestration(format!("order reader task failed: {}", e)))??;

    info!(
        input = %options.input.display(),
        orders = orders.len(),
        "Orders read"
    );

    let storage: Arc<dyn StorageWriter> = match &options.storage {
        StorageTarget::Directory(dir) => Arc::new(CsvTableStorage::new(dir.clone())?),
        StorageTarget::Memory => {
            info!("Dry run, rows are kept in memory only");
            Arc::new(MemoryStorage::new())
        }
    };

    let processor = DatasetProcessor::new(config, storage)?;
    processor
        .process_dataset(&orders, &TracingProgress, options.table.as_deref(), cancel)
        .await
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        warn!("Interrupt received, stopping after the batches in flight");
        cancel.cancel();
    }
}
