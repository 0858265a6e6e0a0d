//! Loader configuration
//!
//! Every tunable the core consults lives in [`LoaderConfig`]. The binary builds
//! it from CLI arguments (each of which can also come from an `ORDER_LOADER_*`
//! environment variable), validates it once, and hands it to the processor.
//! Nothing in the core looks settings up by string key at run time.

use crate::types::LoaderError;
use clap::ValueEnum;
use std::collections::BTreeMap;
use std::time::Duration;

/// Smallest batch the sizer will ever produce
pub const MIN_BATCH_SIZE: usize = 50;
/// Largest batch the sizer will ever produce
pub const MAX_BATCH_SIZE: usize = 2000;
/// Starting batch size when memory is unremarkable
pub const DEFAULT_BATCH_SIZE: usize = 500;
/// Process memory (MB) above which batches shrink
pub const DEFAULT_MEMORY_THRESHOLD_MB: u64 = 500;
/// Reported as available memory when the platform cannot tell us
pub const FALLBACK_AVAILABLE_MB: u64 = 200;
/// Destination table used when nothing else is configured
pub const DEFAULT_TABLE_NAME: &str = "orders";
/// Prefix marking a symbolic table reference, e.g. `@production`
pub const TABLE_ALIAS_PREFIX: char = '@';

/// Bounds and default for the adaptive batch size
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchSizeLimits {
    pub min: usize,
    pub default: usize,
    pub max: usize,
}

impl Default for BatchSizeLimits {
    fn default() -> Self {
        Self {
            min: MIN_BATCH_SIZE,
            default: DEFAULT_BATCH_SIZE,
            max: MAX_BATCH_SIZE,
        }
    }
}

impl BatchSizeLimits {
    /// Check `0 < min <= default <= max`
    pub fn validate(&self) -> Result<(), LoaderError> {
        if self.min == 0 || self.min > self.default || self.default > self.max {
            return Err(LoaderError::invalid_config(format!(
                "batch size bounds must satisfy 0 < min <= default <= max (got min={}, default={}, max={})",
                self.min, self.default, self.max
            )));
        }
        Ok(())
    }

    /// Whether `size` lies inside the inclusive bounds
    pub fn contains(&self, size: usize) -> bool {
        (self.min..=self.max).contains(&size)
    }

    pub fn clamp(&self, size: usize) -> usize {
        size.clamp(self.min, self.max)
    }
}

/// Symbolic table references resolved at startup
///
/// Keys are stored lower-cased and without the `@` prefix, so `@Production`
/// and `@production` name the same entry.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableAliases(BTreeMap<String, String>);

impl TableAliases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `alias` as a name for `table`
    pub fn insert(&mut self, alias: &str, table: impl Into<String>) {
        self.0.insert(normalize_alias(alias), table.into());
    }

    /// Look up an alias, with or without its `@` prefix
    pub fn get(&self, alias: &str) -> Option<&str> {
        self.0.get(&normalize_alias(alias)).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a `KEY=VALUE` pair as given on the command line
    pub fn parse_pair(pair: &str) -> Result<(String, String), String> {
        let (alias, table) = pair
            .split_once('=')
            .ok_or_else(|| format!("expected ALIAS=TABLE, got '{}'", pair))?;
        let alias = alias.trim();
        let table = table.trim();
        if alias.is_empty() || table.is_empty() {
            return Err(format!("alias and table must both be non-empty in '{}'", pair));
        }
        Ok((alias.to_string(), table.to_string()))
    }
}

impl FromIterator<(String, String)> for TableAliases {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut aliases = TableAliases::new();
        for (alias, table) in iter {
            aliases.insert(&alias, table);
        }
        aliases
    }
}

fn normalize_alias(alias: &str) -> String {
    alias
        .trim()
        .trim_start_matches(TABLE_ALIAS_PREFIX)
        .to_lowercase()
}

/// Backoff schedule for failed storage writes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubled for each one after
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before retry number `retry` (1-based)
    ///
    /// With the defaults this yields 1s, 2s, 4s.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Total attempts including the first one
    pub fn total_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// How batches are dispatched
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ExecutionMode {
    /// One batch in flight at a time
    #[default]
    Sequential,
    /// Waves of up to `max_concurrent_batches` batches
    Parallel,
}

/// Complete configuration for a loader run
#[derive(Clone, Debug, PartialEq)]
pub struct LoaderConfig {
    /// Destination when no table (or an unknown alias) is requested
    pub default_table: String,
    pub table_aliases: TableAliases,
    pub batch_limits: BatchSizeLimits,
    /// Pins the starting batch size instead of the memory heuristic
    pub manual_batch_size: Option<usize>,
    pub memory_threshold_mb: u64,
    pub fallback_available_mb: u64,
    pub retry: RetryPolicy,
    pub execution: ExecutionMode,
    pub max_concurrent_batches: usize,
    /// Halve-and-retry rounds allowed at a single offset
    pub max_oom_retries: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            default_table: DEFAULT_TABLE_NAME.to_string(),
            table_aliases: TableAliases::new(),
            batch_limits: BatchSizeLimits::default(),
            manual_batch_size: None,
            memory_threshold_mb: DEFAULT_MEMORY_THRESHOLD_MB,
            fallback_available_mb: FALLBACK_AVAILABLE_MB,
            retry: RetryPolicy::default(),
            execution: ExecutionMode::default(),
            max_concurrent_batches: num_cpus::get(),
            max_oom_retries: 5,
        }
    }
}

impl LoaderConfig {
    /// Validate the numeric settings
    ///
    /// Table names are checked separately by the table name resolver, which
    /// needs the naming policy anyway.
    pub fn validate(&self) -> Result<(), LoaderError> {
        self.batch_limits.validate()?;

        if let Some(size) = self.manual_batch_size {
            if !self.batch_limits.contains(size) {
                return Err(LoaderError::BatchSizeOutOfRange {
                    requested: size,
                    min: self.batch_limits.min,
                    max: self.batch_limits.max,
                });
            }
        }

        if self.memory_threshold_mb == 0 {
            return Err(LoaderError::invalid_config(
                "memory threshold must be greater than zero",
            ));
        }

        if self.max_concurrent_batches == 0 {
            return Err(LoaderError::invalid_config(
                "max concurrent batches must be greater than zero",
            ));
        }

        Ok(())
    }

    /// Number of batches allowed in flight at once for the configured mode
    pub fn in_flight_limit(&self) -> usize {
        match self.execution {
            ExecutionMode::Sequential => 1,
            ExecutionMode::Parallel => self.max_concurrent_batches.max(1),
        }
    }
}
