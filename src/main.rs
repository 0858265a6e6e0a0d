//! Order batch loader CLI
//!
//! Loads an order spreadsheet (exported as CSV) into storage in adaptively
//! sized batches.
//!
//! # Usage
//!
//! ```bash
//! cargo run -- orders.csv > summary.csv
//! cargo run -- --table @archive --table-alias archive=orders_archive orders.csv
//! cargo run -- --mode parallel --max-concurrent 4 --output-dir out orders.csv
//! cargo run -- --dry-run --log-format json orders.csv
//! ```
//!
//! Rows are appended to `<output-dir>/<table>.csv`. Logs go to stderr
//! (`RUST_LOG` controls the level); the run summary is written to stdout as
//! CSV. Ctrl-C stops the run after the batches in flight.
//!
//! # Exit Codes
//!
//! - 0: The run finished (individual records may still have failed)
//! - 1: Error (invalid configuration, missing input file, unreadable CSV, etc.)

use order_batch_loader::cli;
use order_batch_loader::core::LogNotifier;
use order_batch_loader::logging::init_logging;
use order_batch_loader::pipeline::{self, RunOptions, StorageTarget};
use std::process;

fn main() {
    let args = cli::parse_args();
    init_logging(args.log_format);

    let config = match args.to_loader_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let options = RunOptions {
        input: args.input_file.clone(),
        table: args.table.clone(),
        storage: if args.dry_run {
            StorageTarget::Memory
        } else {
            StorageTarget::Directory(args.output_dir.clone())
        },
    };

    let mut output = std::io::stdout();
    if let Err(e) = pipeline::run(&config, &options, &LogNotifier, &mut output) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
