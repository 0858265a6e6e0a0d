//! Types module
//!
//! Contains core data structures used throughout the application.
//! This module organizes types into logical submodules:
//! - `order`: Input order records and the storage-bound row
//! - `summary`: Batch and run counters
//! - `error`: Error types for the loader

pub mod error;
pub mod order;
pub mod summary;

pub use error::{LoaderError, StorageError};
pub use order::{OrderRecord, OrderRow};
pub use summary::{InsertCounts, ProcessingSummary};
