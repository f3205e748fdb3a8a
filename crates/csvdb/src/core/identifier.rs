//! Identifier validation, quoting, literal escaping and slug normalization.
//!
//! SQL identifiers (table names, column names, schema names) cannot be passed as
//! parameters in prepared statements, and neither can most bulk-load options
//! (file paths, delimiters, character sets). Every dynamic piece of SQL built by
//! this crate therefore goes through one of the functions here:
//!
//! 1. Validate identifiers for suspicious patterns (null bytes, excessive length)
//! 2. Apply database-specific quoting (brackets, double quotes, backticks)
//! 3. Escape string literals by doubling single quotes

use heck::ToSnakeCase;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};

/// Maximum identifier length (conservative limit across databases).
/// - PostgreSQL: 63 bytes
/// - SQL Server: 128 characters
/// - MySQL: 64 characters
const MAX_IDENTIFIER_LENGTH: usize = 128;

/// Validate an identifier for security issues.
///
/// Rejects empty identifiers, identifiers containing null bytes and
/// identifiers exceeding the maximum length.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(TransferError::Config(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.contains('\0') {
        return Err(TransferError::Config(format!(
            "SECURITY: Identifier contains null byte (possible injection attempt): {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(TransferError::Config(format!(
            "SECURITY: Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier: `"name"` with embedded quotes doubled.
pub fn quote_pg(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a MySQL identifier: `` `name` `` with embedded backticks doubled.
pub fn quote_mysql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("`{}`", name.replace('`', "``")))
}

/// Quote a SQL Server identifier: `[name]` with closing brackets doubled.
pub fn quote_mssql(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("[{}]", name.replace(']', "]]")))
}

/// Escape a string literal by doubling single quotes.
///
/// This is the standard SQL rule and is correct for PostgreSQL
/// (`standard_conforming_strings = on`) and SQL Server.
pub fn escape_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Escape a MySQL string literal.
///
/// MySQL treats backslash as an escape character inside literals unless
/// `NO_BACKSLASH_ESCAPES` is set, so backslashes are doubled as well. Windows
/// paths in `LOAD DATA LOCAL INFILE` depend on this.
pub fn escape_literal_mysql(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// How raw column names are turned into slugs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlugStyle {
    /// `First Name` -> `first_name`.
    #[default]
    Snake,
    /// Lowercase only, everything else kept.
    Lower,
    /// No normalization.
    Verbatim,
    /// Caller-supplied normalization.
    #[serde(skip)]
    Custom(fn(&str) -> String),
}

impl SlugStyle {
    /// Normalize a raw name. Falls back to the trimmed raw name when the
    /// style would produce an empty identifier (e.g. a header of `#`).
    pub fn slugify(&self, name: &str) -> String {
        let slug = match self {
            SlugStyle::Snake => name.to_snake_case(),
            SlugStyle::Lower => name.trim().to_lowercase(),
            SlugStyle::Verbatim => name.to_string(),
            SlugStyle::Custom(f) => f(name),
        };
        if slug.is_empty() {
            name.trim().to_string()
        } else {
            slug
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_identifier_normal() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("column with spaces").is_ok());
        assert!(validate_identifier("日本語").is_ok());
    }

    #[test]
    fn test_validate_identifier_rejects_empty() {
        let result = validate_identifier("");
        assert!(result.unwrap_err().to_string().contains("empty"));
    }

    #[test]
    fn test_validate_identifier_rejects_null_byte() {
        let result = validate_identifier("table\0name");
        assert!(result.unwrap_err().to_string().contains("null byte"));
    }

    #[test]
    fn test_validate_identifier_rejects_too_long() {
        let long_name = "a".repeat(MAX_IDENTIFIER_LENGTH + 1);
        let result = validate_identifier(&long_name);
        assert!(result.unwrap_err().to_string().contains("maximum length"));
    }

    #[test]
    fn test_quote_per_backend() {
        assert_eq!(quote_pg("table\"name").unwrap(), "\"table\"\"name\"");
        assert_eq!(quote_mysql("table`name").unwrap(), "`table``name`");
        assert_eq!(quote_mssql("table]name").unwrap(), "[table]]name]");
    }

    #[test]
    fn test_quote_pg_sql_injection_safely_quoted() {
        let result = quote_pg("Robert'); DROP TABLE Students;--").unwrap();
        assert_eq!(result, "\"Robert'); DROP TABLE Students;--\"");
    }

    #[test]
    fn test_escape_literal_doubles_quotes() {
        assert_eq!(escape_literal("O'Brien"), "'O''Brien'");
        assert_eq!(escape_literal("C:\\data\\x.csv"), "'C:\\data\\x.csv'");
        assert_eq!(escape_literal_mysql("C:\\data\\it's.csv"), "'C:\\\\data\\\\it''s.csv'");
    }

    #[test]
    fn test_slug_styles() {
        assert_eq!(SlugStyle::Snake.slugify("First Name"), "first_name");
        assert_eq!(SlugStyle::Snake.slugify("orderID"), "order_id");
        assert_eq!(SlugStyle::Lower.slugify(" Total "), "total");
        assert_eq!(SlugStyle::Verbatim.slugify("First Name"), "First Name");
        assert_eq!(SlugStyle::Snake.slugify("#"), "#");

        fn upper(s: &str) -> String {
            s.to_uppercase()
        }
        assert_eq!(SlugStyle::Custom(upper).slugify("abc"), "ABC");
    }
}
