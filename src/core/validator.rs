//! Record validation
//!
//! An order is worth persisting only when it names who receives what and
//! where. Both predicates here are pure: no logging, no errors.

use crate::types::{OrderRecord, OrderRow};

/// Whether an input order carries the minimum required fields
///
/// Recipient name, address and product name must be non-blank and the
/// quantity strictly positive. The order number is optional.
pub fn is_valid_record(record: &OrderRecord) -> bool {
    has_text(&record.recipient_name)
        && has_text(&record.address)
        && has_text(&record.product_name)
        && record.quantity > 0
}

/// The same check, applied to a converted row
pub fn is_valid_row(row: &OrderRow) -> bool {
    has_text(&row.recipient_name)
        && has_text(&row.address)
        && has_text(&row.product_name)
        && row.quantity > 0
}

fn has_text(value: &str) -> bool {
    !value.trim().is_empty()
}
