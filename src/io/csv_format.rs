//! CSV output for run summaries
//!
//! The binary prints one summary row to stdout so runs can be piped or
//! appended to a report. Pure apart from the writer it is given.

use crate::types::{LoaderError, ProcessingSummary};
use std::io::Write;

/// Header of the summary CSV
pub const SUMMARY_HEADER: [&str; 8] = [
    "table",
    "succeeded",
    "failed",
    "unprocessed",
    "batches",
    "final_batch_size",
    "success_rate",
    "cancelled",
];

/// Write a run summary as CSV (header plus one row)
///
/// The success rate is written as a percentage with one decimal place.
///
/// # Arguments
///
/// * `summary` - The finished run
/// * `output` - Mutable reference to a writer for outputting CSV
///
/// # Returns
///
/// * `Ok(())` if writing succeeded
/// * `Err(LoaderError::IoError)` if a write error occurred
pub fn write_summary_csv(
    summary: &ProcessingSummary,
    output: &mut dyn Write,
) -> Result<(), LoaderError> {
    let mut writer = csv::Writer::from_writer(output);

    writer.write_record(SUMMARY_HEADER)?;
    writer.write_record(&[
        summary.table.clone(),
        summary.succeeded().to_string(),
        summary.failed().to_string(),
        summary.unprocessed().to_string(),
        summary.batches.to_string(),
        summary.final_batch_size.to_string(),
        format!("{:.1}", summary.success_rate()),
        summary.cancelled.to_string(),
    ])?;
    writer.flush()?;

    Ok(())
}
