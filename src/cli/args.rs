use crate::config::{
    ExecutionMode, LoaderConfig, TableAliases, DEFAULT_MEMORY_THRESHOLD_MB, DEFAULT_TABLE_NAME,
};
use crate::logging::LogFormat;
use crate::types::LoaderError;
use clap::Parser;
use std::path::PathBuf;
use tracing::warn;

/// Load order spreadsheets into storage in adaptively sized batches
#[derive(Parser, Debug)]
#[command(name = "order-loader")]
#[command(
    about = "Load order spreadsheets into storage in adaptively sized batches",
    long_about = None
)]
pub struct CliArgs {
    /// Input CSV file path containing order rows
    #[arg(value_name = "INPUT", help = "Path to the order CSV file")]
    pub input_file: PathBuf,

    /// Destination table or @alias for this run
    #[arg(
        long = "table",
        value_name = "TABLE",
        env = "ORDER_LOADER_TABLE",
        help = "Destination table name or @alias (default: the default table)"
    )]
    pub table: Option<String>,

    /// Table used when none is requested or an alias is unknown
    #[arg(
        long = "default-table",
        value_name = "TABLE",
        env = "ORDER_LOADER_DEFAULT_TABLE",
        default_value = DEFAULT_TABLE_NAME
    )]
    pub default_table: String,

    /// Alias definitions, repeatable
    #[arg(
        long = "table-alias",
        value_name = "ALIAS=TABLE",
        env = "ORDER_LOADER_TABLE_ALIASES",
        value_delimiter = ',',
        value_parser = TableAliases::parse_pair,
        help = "Define an alias usable as --table @ALIAS (repeatable)"
    )]
    pub table_aliases: Vec<(String, String)>,

    /// Fixed starting batch size, bypassing the memory heuristic
    #[arg(
        long = "batch-size",
        value_name = "SIZE",
        env = "ORDER_LOADER_BATCH_SIZE",
        help = "Starting batch size (range: 50-2000, default: chosen from available memory)"
    )]
    pub batch_size: Option<usize>,

    /// Process memory (MB) above which batches shrink
    #[arg(
        long = "memory-threshold-mb",
        value_name = "MB",
        env = "ORDER_LOADER_MEMORY_THRESHOLD_MB",
        default_value_t = DEFAULT_MEMORY_THRESHOLD_MB
    )]
    pub memory_threshold_mb: u64,

    /// Batch dispatch mode
    #[arg(
        long = "mode",
        value_name = "MODE",
        env = "ORDER_LOADER_MODE",
        default_value = "sequential"
    )]
    pub mode: ExecutionMode,

    /// Maximum number of concurrent batches (parallel mode only)
    #[arg(
        long = "max-concurrent",
        value_name = "COUNT",
        env = "ORDER_LOADER_MAX_CONCURRENT",
        help = "Maximum number of batches in flight in parallel mode (default: CPU cores)"
    )]
    pub max_concurrent_batches: Option<usize>,

    /// Directory receiving one CSV file per table
    #[arg(
        long = "output-dir",
        value_name = "DIR",
        env = "ORDER_LOADER_OUTPUT_DIR",
        default_value = "loaded"
    )]
    pub output_dir: PathBuf,

    /// Run everything against in-memory storage
    #[arg(long = "dry-run", env = "ORDER_LOADER_DRY_RUN")]
    pub dry_run: bool,

    /// Log line format on stderr
    #[arg(
        long = "log-format",
        value_name = "FORMAT",
        env = "ORDER_LOADER_LOG_FORMAT",
        default_value = "text"
    )]
    pub log_format: LogFormat,
}

impl CliArgs {
    /// Create a LoaderConfig from CLI arguments
    ///
    /// Unset options keep their defaults. A zero `--max-concurrent` falls
    /// back to the default with a warning; everything else is checked by
    /// `LoaderConfig::validate`.
    ///
    /// # Errors
    ///
    /// `LoaderError::BatchSizeOutOfRange` for a batch size outside 50-2000,
    /// `LoaderError::InvalidConfig` for a zero memory threshold.
    pub fn to_loader_config(&self) -> Result<LoaderConfig, LoaderError> {
        let default = LoaderConfig::default();

        let max_concurrent_batches = match self.max_concurrent_batches {
            Some(0) => {
                warn!(
                    fallback = default.max_concurrent_batches,
                    "max concurrent batches cannot be 0, using default"
                );
                default.max_concurrent_batches
            }
            Some(n) => n,
            None => default.max_concurrent_batches,
        };

        let config = LoaderConfig {
            default_table: self.default_table.clone(),
            table_aliases: self.table_aliases.iter().cloned().collect(),
            manual_batch_size: self.batch_size,
            memory_threshold_mb: self.memory_threshold_mb,
            execution: self.mode,
            max_concurrent_batches,
            ..default
        };
        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::default_mode(&["program", "input.csv"], ExecutionMode::Sequential)]
    #[case::explicit_sequential(&["program", "--mode", "sequential", "input.csv"], ExecutionMode::Sequential)]
    #[case::explicit_parallel(&["program", "--mode", "parallel", "input.csv"], ExecutionMode::Parallel)]
    fn test_mode_parsing(#[case] args: &[&str], #[case] expected: ExecutionMode) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        assert_eq!(parsed.mode, expected);
    }

    #[rstest]
    #[case::batch_size(&["program", "--batch-size", "800", "input.csv"], Some(800), None)]
    #[case::max_concurrent(&["program", "--max-concurrent", "8", "input.csv"], None, Some(8))]
    #[case::no_options(&["program", "input.csv"], None, None)]
    #[case::all_options(
        &["program", "--mode", "parallel", "--batch-size", "800", "--max-concurrent", "8", "input.csv"],
        Some(800),
        Some(8)
    )]
    fn test_config_options(
        #[case] args: &[&str],
        #[case] batch_size: Option<usize>,
        #[case] max_concurrent: Option<usize>,
    ) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        assert_eq!(parsed.batch_size, batch_size);
        assert_eq!(parsed.max_concurrent_batches, max_concurrent);
    }

    #[test]
    fn test_table_aliases_collected() {
        let parsed = CliArgs::try_parse_from([
            "program",
            "--table-alias",
            "archive=orders_archive",
            "--table-alias",
            "@Returns=order_returns",
            "--table",
            "@archive",
            "input.csv",
        ])
        .unwrap();
        let config = parsed.to_loader_config().unwrap();

        assert_eq!(parsed.table.as_deref(), Some("@archive"));
        assert_eq!(config.table_aliases.get("archive"), Some("orders_archive"));
        assert_eq!(config.table_aliases.get("returns"), Some("order_returns"));
    }

    #[rstest]
    #[case::all_defaults(&["program", "input.csv"], None, num_cpus::get())]
    #[case::custom_batch_size(&["program", "--batch-size", "2000", "input.csv"], Some(2000), num_cpus::get())]
    #[case::custom_max_concurrent(&["program", "--max-concurrent", "8", "input.csv"], None, 8)]
    #[case::zero_max_concurrent(&["program", "--max-concurrent", "0", "input.csv"], None, num_cpus::get())]
    fn test_loader_config_conversion(
        #[case] args: &[&str],
        #[case] expected_batch_size: Option<usize>,
        #[case] expected_max_concurrent: usize,
    ) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        let config = parsed.to_loader_config().unwrap();

        assert_eq!(config.manual_batch_size, expected_batch_size);
        assert_eq!(config.max_concurrent_batches, expected_max_concurrent);
        assert_eq!(config.default_table, "orders");
    }

    #[rstest]
    #[case::below_min(&["program", "--batch-size", "49", "input.csv"])]
    #[case::above_max(&["program", "--batch-size", "2001", "input.csv"])]
    fn test_out_of_range_batch_size_rejected(#[case] args: &[&str]) {
        let parsed = CliArgs::try_parse_from(args).unwrap();
        assert!(matches!(
            parsed.to_loader_config(),
            Err(LoaderError::BatchSizeOutOfRange { .. })
        ));
    }

    #[test]
    fn test_zero_memory_threshold_rejected() {
        let parsed =
            CliArgs::try_parse_from(["program", "--memory-threshold-mb", "0", "input.csv"]).unwrap();
        assert!(matches!(
            parsed.to_loader_config(),
            Err(LoaderError::InvalidConfig { .. })
        ));
    }

    #[rstest]
    #[case::missing_input(&["program"])]
    #[case::invalid_mode(&["program", "--mode", "turbo", "input.csv"])]
    #[case::invalid_alias(&["program", "--table-alias", "no_equals_sign", "input.csv"])]
    #[case::invalid_log_format(&["program", "--log-format", "xml", "input.csv"])]
    fn test_parsing_errors(#[case] args: &[&str]) {
        let result = CliArgs::try_parse_from(args);
        assert!(result.is_err());
    }
}
