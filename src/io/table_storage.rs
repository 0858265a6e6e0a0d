//! Storage backends for converted order rows
//!
//! - `CsvTableStorage` appends each table to its own CSV file in a directory.
//! - `MemoryStorage` keeps rows in a concurrent map; used for dry runs,
//!   tests and benchmarks.
//!
//! Both report every row they were given as inserted. Neither holds a
//! transaction across calls.

use crate::core::traits::StorageWriter;
use crate::types::{LoaderError, OrderRow, StorageError};
use async_trait::async_trait;
use csv::WriterBuilder;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Appends rows to `<dir>/<table>.csv`
///
/// The header row is written when a table file is created. Writes run on
/// tokio's blocking pool; one lock serialises appends so concurrent batches
/// never interleave lines.
#[derive(Debug, Clone)]
pub struct CsvTableStorage {
    dir: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl CsvTableStorage {
    /// Use `dir` for table files, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, LoaderError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing `table`
    pub fn table_path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", table))
    }
}

/// Append `rows` as one unit: either all of them land or none do
///
/// The batch is encoded in memory first and written with a single call; if
/// that write fails partway, the file is cut back to its previous length so
/// a retried batch cannot leave duplicates behind.
fn append_rows(path: &Path, rows: &[OrderRow]) -> Result<usize, StorageError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let original_len = file.metadata()?.len();

    let mut writer = WriterBuilder::new()
        .has_headers(original_len == 0)
        .from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    let encoded = writer
        .into_inner()
        .map_err(|e| StorageError::other(format!("encoding batch failed: {}", e)))?;

    write_all_or_rollback(&mut file, &encoded, |f| f.set_len(original_len))?;

    Ok(rows.len())
}

fn write_all_or_rollback<W: Write>(
    out: &mut W,
    bytes: &[u8],
    rollback: impl FnOnce(&mut W) -> std::io::Result<()>,
) -> std::io::Result<()> {
    if let Err(e) = out.write_all(bytes).and_then(|()| out.flush()) {
        if let Err(rollback_error) = rollback(out) {
            warn!(error = %rollback_error, "Could not roll back partial append");
        }
        return Err(e);
    }
    Ok(())
}

#[async_trait]
impl StorageWriter for CsvTableStorage {
    async fn write_batch(&self, table: &str, rows: &[OrderRow]) -> Result<usize, StorageError> {
        let path = self.table_path(table);
        let rows = rows.to_vec();
        let lock = Arc::clone(&self.write_lock);

        let written = tokio::task::spawn_blocking(move || {
            let _guard = lock.lock();
            append_rows(&path, &rows)
        })
        .await
        .map_err(|e| StorageError::other(format!("write task failed: {}", e)))??;

        debug!(table, rows = written, "Rows appended");
        Ok(written)
    }
}

/// Keeps rows in memory, keyed by table
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: DashMap<String, Vec<OrderRow>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the rows stored in `table`
    pub fn rows(&self, table: &str) -> Vec<OrderRow> {
        self.tables
            .get(table)
            .map(|rows| rows.clone())
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map(|rows| rows.len()).unwrap_or(0)
    }

    /// Names of every table written so far, sorted
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl StorageWriter for MemoryStorage {
    async fn write_batch(&self, table: &str, rows: &[OrderRow]) -> Result<usize, StorageError> {
        self.tables
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(rows);
        Ok(rows.len())
    }
}
