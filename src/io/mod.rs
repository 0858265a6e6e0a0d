//! I/O module
//!
//! Handles order input, row storage and summary output.
//!
//! # Components
//!
//! - `order_reader` - Header-mapped order CSV reader
//! - `table_storage` - CSV-file and in-memory storage backends
//! - `csv_format` - Run summary serialization

pub mod csv_format;
pub mod order_reader;
pub mod table_storage;

pub use csv_format::write_summary_csv;
pub use order_reader::{read_orders, OrderReader};
pub use table_storage::{CsvTableStorage, MemoryStorage};
