//! Destination table name resolution
//!
//! The table name ends up inside statements that cannot bind identifiers as
//! parameters, so every name leaving this module has passed [`check_name`].
//! Resolution order:
//!
//! 1. no candidate, or a blank one: the configured default table
//! 2. a symbolic reference (`@alias`): the aliased table, or the default when
//!    the alias is unknown
//! 3. anything else: the candidate itself, if the naming policy accepts it
//!
//! The default table and every alias target are checked once, when the
//! resolver is built, so steps 1 and 2 cannot fail later.

use crate::config::{TableAliases, TABLE_ALIAS_PREFIX};
use crate::types::LoaderError;

/// Longest accepted identifier, in characters
pub const MAX_TABLE_NAME_LEN: usize = 64;

/// Words that may not be used as a whole table name (compared case-insensitively)
const RESERVED_WORDS: [&str; 25] = [
    "SELECT",
    "INSERT",
    "UPDATE",
    "DELETE",
    "DROP",
    "CREATE",
    "ALTER",
    "TRUNCATE",
    "TABLE",
    "DATABASE",
    "INDEX",
    "VIEW",
    "PROCEDURE",
    "FUNCTION",
    "TRIGGER",
    "UNION",
    "JOIN",
    "WHERE",
    "FROM",
    "INTO",
    "VALUES",
    "SET",
    "AND",
    "OR",
    "NOT",
];

/// Resolves and validates destination table names
#[derive(Debug, Clone)]
pub struct TableNameResolver {
    default_table: String,
    aliases: TableAliases,
}

impl TableNameResolver {
    /// Build a resolver, checking the default and all alias targets up front
    ///
    /// # Errors
    ///
    /// Returns `LoaderError::InvalidTableName` naming the first configured
    /// table that breaks the policy.
    pub fn new(default_table: &str, aliases: TableAliases) -> Result<Self, LoaderError> {
        check_name(default_table)?;
        for (_, table) in aliases.iter() {
            check_name(table)?;
        }

        Ok(Self {
            default_table: default_table.to_string(),
            aliases,
        })
    }

    pub fn default_table(&self) -> &str {
        &self.default_table
    }

    /// Resolve a requested table name
    ///
    /// # Arguments
    ///
    /// * `candidate` - Requested table, a symbolic `@alias`, or `None`
    ///
    /// # Returns
    ///
    /// The table to write to. A valid candidate comes back unchanged.
    ///
    /// # Errors
    ///
    /// `LoaderError::InvalidTableName` when a literal candidate fails the
    /// naming policy.
    pub fn resolve(&self, candidate: Option<&str>) -> Result<String, LoaderError> {
        let candidate = match candidate {
            Some(c) if !c.trim().is_empty() => c,
            _ => return Ok(self.default_table.clone()),
        };

        if candidate.starts_with(TABLE_ALIAS_PREFIX) {
            return Ok(match self.aliases.get(candidate) {
                Some(table) => table.to_string(),
                None => {
                    tracing::warn!(
                        alias = %candidate,
                        fallback = %self.default_table,
                        "Unknown table alias, using default table"
                    );
                    self.default_table.clone()
                }
            });
        }

        check_name(candidate)?;
        Ok(candidate.to_string())
    }
}

/// Apply the naming policy to a literal table name
pub fn check_name(name: &str) -> Result<(), LoaderError> {
    let len = name.chars().count();
    if len == 0 || len > MAX_TABLE_NAME_LEN {
        return Err(LoaderError::invalid_table_name(
            name,
            &format!("length must be between 1 and {} characters", MAX_TABLE_NAME_LEN),
        ));
    }

    if name.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        return Err(LoaderError::invalid_table_name(
            name,
            "must not start with a digit",
        ));
    }

    if let Some(bad) = name
        .chars()
        .find(|&c| !(c.is_alphabetic() || c.is_ascii_digit() || c == '_'))
    {
        return Err(LoaderError::invalid_table_name(
            name,
            &format!("character '{}' is not allowed", bad),
        ));
    }

    if RESERVED_WORDS
        .iter()
        .any(|word| word.eq_ignore_ascii_case(name))
    {
        return Err(LoaderError::invalid_table_name(name, "reserved word"));
    }

    Ok(())
}
