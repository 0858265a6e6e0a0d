//! Error types for the order batch loader
//!
//! This module defines the errors that can surface while loading orders.
//! Per-record validation failures are never errors: they are counted by the
//! batch inserter. What remains here falls into three groups.
//!
//! # Error Categories
//!
//! - **Configuration Errors**: invalid table names, batch sizes or bounds (fatal, raised before any batch)
//! - **Input Errors**: file not found, I/O and CSV parse failures while reading orders
//! - **Orchestration Errors**: invariant breaks in the dataset loop (fatal)
//!
//! Storage writes report through [`StorageError`], which the inserter absorbs
//! into failure counts or, for out-of-memory, hands to the processor.

use thiserror::Error;

/// Main error type for the loader
///
/// Each variant includes enough context to diagnose the problem from the CLI
/// output alone.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoaderError {
    /// Destination table name failed the naming policy
    ///
    /// Fatal for the run: raised before any batch is attempted.
    #[error("Invalid table name '{name}': {reason}")]
    InvalidTableName {
        /// The rejected candidate
        name: String,
        /// Which rule it broke
        reason: String,
    },

    /// A manual batch size outside the configured bounds
    #[error("Batch size {requested} is out of range ({min}-{max})")]
    BatchSizeOutOfRange {
        /// The size that was requested
        requested: usize,
        /// Lower bound (inclusive)
        min: usize,
        /// Upper bound (inclusive)
        max: usize,
    },

    /// Configuration values that contradict each other
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem
        message: String,
    },

    /// File not found at the specified path
    #[error("File not found: {path}")]
    FileNotFound {
        /// The path that was not found
        path: String,
    },

    /// I/O error occurred while reading or writing files
    #[error("I/O error: {message}")]
    IoError {
        /// Description of the I/O error
        message: String,
    },

    /// CSV parsing error occurred
    #[error("CSV parse error{}: {message}", line.map(|l| format!(" at line {}", l)).unwrap_or_default())]
    ParseError {
        /// Line number where the error occurred (if available)
        line: Option<u64>,
        /// Description of the parsing error
        message: String,
    },

    /// Failure in the dataset loop itself rather than in a single batch
    ///
    /// This is the only error a caller sees once batches have started.
    #[error("Orchestration failure: {message}")]
    Orchestration {
        /// Description of the broken invariant
        message: String,
    },
}

/// Failure reported by a storage backend for one write call
///
/// The inserter treats `OutOfMemory` specially (batch halving, in-place
/// retry). Every other variant goes through the backoff retry path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The write could not allocate what it needed
    #[error("out of memory: {message}")]
    OutOfMemory {
        /// Backend-specific detail
        message: String,
    },

    /// Recoverable failure such as a timeout or lock contention
    #[error("transient write failure: {message}")]
    Transient {
        /// Backend-specific detail
        message: String,
    },

    /// Anything else the backend could not classify
    #[error("write failed: {message}")]
    Other {
        /// Backend-specific detail
        message: String,
    },
}

impl From<std::io::Error> for LoaderError {
    fn from(error: std::io::Error) -> Self {
        LoaderError::IoError {
            message: error.to_string(),
        }
    }
}

impl From<csv::Error> for LoaderError {
    fn from(error: csv::Error) -> Self {
        let line = error.position().map(|pos| pos.line());

        LoaderError::ParseError {
            line,
            message: error.to_string(),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::OutOfMemory => StorageError::OutOfMemory {
                message: error.to_string(),
            },
            ErrorKind::TimedOut | ErrorKind::Interrupted | ErrorKind::WouldBlock => {
                StorageError::Transient {
                    message: error.to_string(),
                }
            }
            _ => StorageError::Other {
                message: error.to_string(),
            },
        }
    }
}

impl From<csv::Error> for StorageError {
    fn from(error: csv::Error) -> Self {
        match error.into_kind() {
            csv::ErrorKind::Io(io) => io.into(),
            other => StorageError::Other {
                message: format!("{:?}", other),
            },
        }
    }
}

// Helper functions for creating common errors

impl LoaderError {
    /// Create an InvalidTableName error
    pub fn invalid_table_name(name: &str, reason: &str) -> Self {
        LoaderError::InvalidTableName {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create an InvalidConfig error
    pub fn invalid_config(message: impl Into<String>) -> Self {
        LoaderError::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create an Orchestration error
    pub fn orchestration(message: impl Into<String>) -> Self {
        LoaderError::Orchestration {
            message: message.into(),
        }
    }
}

impl StorageError {
    /// Create a Transient error
    pub fn transient(message: impl Into<String>) -> Self {
        StorageError::Transient {
            message: message.into(),
        }
    }

    /// Create an OutOfMemory error
    pub fn out_of_memory(message: impl Into<String>) -> Self {
        StorageError::OutOfMemory {
            message: message.into(),
        }
    }

    /// Create an Other error
    pub fn other(message: impl Into<String>) -> Self {
        StorageError::Other {
            message: message.into(),
        }
    }

    /// Whether this failure should trigger batch halving instead of backoff
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, StorageError::OutOfMemory { .. })
    }
}
