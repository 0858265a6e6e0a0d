//! Core business logic module
//!
//! This module contains the batch loading components:
//! - `traits` - Seams to storage, time, progress and notification
//! - `validator` - Record and row completeness checks
//! - `converter` - Order record to storage row mapping
//! - `table_name` - Destination table resolution and naming policy
//! - `memory` - Process and system memory sampling
//! - `batch_sizer` - Adaptive batch size state
//! - `inserter` - Single batch write with retry
//! - `processor` - Whole-dataset orchestration

pub mod batch_sizer;
pub mod converter;
pub mod inserter;
pub mod memory;
pub mod processor;
pub mod table_name;
pub mod traits;
pub mod validator;

pub use batch_sizer::AdaptiveBatchSizer;
pub use converter::to_storage_row;
pub use inserter::{Batch, BatchInserter, InsertError};
pub use memory::{FixedMemoryMonitor, MemoryMonitor, SystemMemoryMonitor};
pub use processor::DatasetProcessor;
pub use table_name::TableNameResolver;
pub use traits::{
    Clock, CompletionNotifier, LogNotifier, ProgressSink, StorageWriter, TokioClock,
    TracingProgress,
};
pub use validator::{is_valid_record, is_valid_row};
