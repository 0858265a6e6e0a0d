//! Order CSV reader
//!
//! Reads an order sheet exported as CSV. The header row decides the mapping:
//! the five known columns are matched case-insensitively, every other column
//! becomes an extra field keyed by its header text.
//!
//! Reading is lenient on content and strict on structure. A quantity that
//! does not parse becomes 0, so the record reaches the loader and is counted
//! as a failure there instead of disappearing here. A row the CSV parser
//! cannot read at all is an error carrying its line number.
//!
//! ```no_run
//! use order_batch_loader::io::order_reader::read_orders;
//! use std::path::Path;
//!
//! let orders = read_orders(Path::new("orders.csv")).unwrap();
//! println!("Read {} orders", orders.len());
//! ```

use crate::types::{LoaderError, OrderRecord};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Known column of the order sheet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    OrderNumber,
    RecipientName,
    Address,
    ProductName,
    Quantity,
    Extra,
}

impl Column {
    fn from_header(header: &str) -> Self {
        match header.trim().to_lowercase().as_str() {
            "order_number" => Column::OrderNumber,
            "recipient_name" => Column::RecipientName,
            "address" => Column::Address,
            "product_name" => Column::ProductName,
            "quantity" => Column::Quantity,
            _ => Column::Extra,
        }
    }
}

/// Streaming reader yielding one `OrderRecord` per data row
#[derive(Debug)]
pub struct OrderReader<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<(Column, String)>,
    row: StringRecord,
}

impl OrderReader<File> {
    /// Open an order CSV file
    ///
    /// # Errors
    ///
    /// `LoaderError::FileNotFound` when the path does not exist, otherwise
    /// I/O or parse errors from reading the header row.
    pub fn from_path(path: &Path) -> Result<Self, LoaderError> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => LoaderError::FileNotFound {
                path: path.display().to_string(),
            },
            _ => LoaderError::from(e),
        })?;

        Self::from_reader(file)
    }
}

impl<R: Read> OrderReader<R> {
    /// Wrap any reader and consume its header row
    pub fn from_reader(input: R) -> Result<Self, LoaderError> {
        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .buffer_capacity(8 * 1024)
            .from_reader(input);

        let headers = reader
            .headers()?
            .iter()
            .map(|h| (Column::from_header(h), h.trim().to_string()))
            .collect();

        Ok(Self {
            reader,
            headers,
            row: StringRecord::new(),
        })
    }

    fn to_order(&self) -> OrderRecord {
        let mut order = OrderRecord::default();

        for ((column, header), value) in self.headers.iter().zip(self.row.iter()) {
            match column {
                Column::OrderNumber => order.order_number = value.to_string(),
                Column::RecipientName => order.recipient_name = value.to_string(),
                Column::Address => order.address = value.to_string(),
                Column::ProductName => order.product_name = value.to_string(),
                Column::Quantity => order.quantity = parse_quantity(value),
                Column::Extra => {
                    if !value.is_empty() {
                        order.extra.insert(header.clone(), value.to_string());
                    }
                }
            }
        }

        order
    }
}

impl<R: Read> Iterator for OrderReader<R> {
    type Item = Result<OrderRecord, LoaderError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.reader.read_record(&mut self.row) {
            Ok(true) => Some(Ok(self.to_order())),
            Ok(false) => None,
            Err(e) => Some(Err(e.into())),
        }
    }
}

/// Whole numbers only; anything else reads as 0
fn parse_quantity(value: &str) -> i64 {
    value.parse().unwrap_or_else(|_| {
        if !value.is_empty() {
            debug!(value, "Unparsable quantity, reading as 0");
        }
        0
    })
}

/// Read every order from a CSV file, in file order
pub fn read_orders(path: &Path) -> Result<Vec<OrderRecord>, LoaderError> {
    OrderReader::from_path(path)?.collect()
}
