//! Conversion from input orders to storage rows
//!
//! Conversion never fails outward. Anything the destination columns cannot
//! hold turns the row into [`OrderRow::invalid`], which the batch inserter
//! then counts as a failure instead of aborting the batch.

use crate::types::{OrderRecord, OrderRow};
use tracing::debug;

/// Map an order onto the storage row shape
///
/// Text fields are trimmed, the quantity is narrowed to the 32-bit storage
/// column, and extra columns are encoded as a JSON object.
pub fn to_storage_row(record: &OrderRecord) -> OrderRow {
    match try_convert(record) {
        Ok(row) => row,
        Err(reason) => {
            debug!(
                order_number = %record.order_number,
                reason = %reason,
                "Order conversion failed, emitting invalid row"
            );
            OrderRow::invalid(&record.order_number)
        }
    }
}

fn try_convert(record: &OrderRecord) -> Result<OrderRow, String> {
    let quantity = i32::try_from(record.quantity)
        .map_err(|_| format!("quantity {} does not fit the storage column", record.quantity))?;

    let extra_fields = if record.extra.is_empty() {
        String::new()
    } else {
        serde_json::to_string(&record.extra)
            .map_err(|e| format!("extra fields could not be encoded: {}", e))?
    };

    Ok(OrderRow {
        order_number: record.order_number.trim().to_string(),
        recipient_name: record.recipient_name.trim().to_string(),
        address: record.address.trim().to_string(),
        product_name: record.product_name.trim().to_string(),
        quantity,
        extra_fields,
    })
}
