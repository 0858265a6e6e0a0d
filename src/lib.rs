//! Order Batch Loader Library
//! # Overview
//!
//! This library loads order records (one row per parcel from a logistics
//! spreadsheet) into storage in batches whose size adapts to memory pressure.
//!
//! # Architecture
//!
//! The system is organized into several key components:
//!
//! - [`types`] - Core data types (OrderRecord, OrderRow, summaries, errors)
//! - [`config`] - Typed loader configuration and its defaults
//! - [`cli`] - CLI arguments parsing
//! - [`core`] - Business logic components:
//!   - [`core::validator`] / [`core::converter`] - Record checks and storage mapping
//!   - [`core::table_name`] - Destination resolution with alias support
//!   - [`core::memory`] / [`core::batch_sizer`] - Memory sampling and adaptive sizing
//!   - [`core::inserter`] - One batch to storage, with retry and backoff
//!   - [`core::processor`] - Whole-dataset orchestration
//! - [`io`] - Order CSV input, storage backends, summary output
//! - [`pipeline`] - Runtime setup and the full run used by the binary
//! - [`logging`] - `tracing` subscriber setup
//! - [`testing`] - Scripted storage and clock for tests and benchmarks
//!
//! # Batch Sizing
//!
//! - **Start**: twice the default with over 1000 MB available, half below 200 MB
//! - **Pressure**: shrink by a quarter while process memory is over the threshold
//! - **Recovery**: grow by a quarter while under half the threshold and below the default
//! - **Out of memory**: halve and retry the same records
//!
//! Every size stays within 50-2000.
//!
//! # Failure Accounting
//!
//! Each record ends up counted exactly once as stored or failed. Invalid
//! records, conversion failures and batches that exhaust their retries are
//! counted as failures; none of them stop the run.

// Module declarations
pub mod cli;
pub mod config;
pub mod core;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod testing;
pub mod types;

pub use config::{ExecutionMode, LoaderConfig};
pub use self::core::{BatchInserter, DatasetProcessor, StorageWriter};
pub use io::{read_orders, write_summary_csv};
pub use types::{
    InsertCounts, LoaderError, OrderRecord, OrderRow, ProcessingSummary, StorageError,
};
