//! Order types for the loader
//!
//! `OrderRecord` is what the ingestion side hands to the core; `OrderRow` is
//! the storage-bound shape produced by the converter.

use serde::Serialize;
use std::collections::BTreeMap;

/// Input order as read from the spreadsheet
///
/// Read-only to the core. Columns the loader does not know about are kept in
/// `extra` so they can travel into storage unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OrderRecord {
    /// Order number as printed on the sheet (may be empty)
    pub order_number: String,

    /// Name of the person receiving the parcel
    pub recipient_name: String,

    /// Delivery address
    pub address: String,

    /// Product name
    pub product_name: String,

    /// Ordered quantity
    ///
    /// Signed so that negative values in the input survive long enough to be
    /// rejected by validation instead of failing at parse time.
    pub quantity: i64,

    /// Any additional columns, keyed by header name
    pub extra: BTreeMap<String, String>,
}

impl OrderRecord {
    /// Create an order with no extra fields
    pub fn new(
        order_number: impl Into<String>,
        recipient_name: impl Into<String>,
        address: impl Into<String>,
        product_name: impl Into<String>,
        quantity: i64,
    ) -> Self {
        Self {
            order_number: order_number.into(),
            recipient_name: recipient_name.into(),
            address: address.into(),
            product_name: product_name.into(),
            quantity,
            extra: BTreeMap::new(),
        }
    }

    /// Attach an additional column value
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Persisted-row representation of an order
///
/// Field order matches the column order of the destination table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderRow {
    pub order_number: String,
    pub recipient_name: String,
    pub address: String,
    pub product_name: String,
    /// Storage column is a 32-bit integer
    pub quantity: i32,
    /// Extra columns encoded as a JSON object
    pub extra_fields: String,
}

impl OrderRow {
    /// The sentinel produced when conversion fails
    ///
    /// Keeps the order number for diagnostics; every other field is empty so
    /// the row can never pass validation.
    pub fn invalid(order_number: &str) -> Self {
        Self {
            order_number: order_number.to_string(),
            recipient_name: String::new(),
            address: String::new(),
            product_name: String::new(),
            quantity: 0,
            extra_fields: String::new(),
        }
    }
}
