//! Microsoft SQL Server SQL dialect (Strategy pattern).
//!
//! Provides MSSQL-specific SQL syntax for identifier quoting, column types,
//! pagination and parameter placeholders.

use crate::config::DbKind;
use crate::core::column::{Column, ColumnDefault, DataType};
use crate::core::identifier::quote_mssql;
use crate::core::query::SelectParts;
use crate::core::traits::{Capabilities, Dialect, UpsertSupport};
use crate::drivers::common::with_args;
use crate::error::{Result, TransferError};

/// Longest nvarchar that can be part of an index key (900 bytes).
const MAX_KEY_NVARCHAR: u32 = 450;

/// MSSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MssqlDialect;

impl MssqlDialect {
    /// Create a new MSSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MssqlDialect {
    fn name(&self) -> &str {
        "mssql"
    }

    fn kind(&self) -> DbKind {
        DbKind::Mssql
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_mssql(name)
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("@P{}", index)
    }

    fn default_temporal_precision(&self) -> u32 {
        7
    }

    fn column_type(&self, column: &Column) -> String {
        if column.default() == &ColumnDefault::AutoSequence
            && !column.effective_type().is_integer()
        {
            return "int".to_string();
        }
        let precision = column.precision();
        let keyed = column.primary_key() || column.index();
        match column.effective_type() {
            DataType::Text if keyed => format!("nvarchar({})", MAX_KEY_NVARCHAR),
            DataType::Text => "nvarchar(max)".to_string(),
            DataType::Varchar => match precision {
                Some(p) => format!("nvarchar({})", p),
                None if keyed => format!("nvarchar({})", MAX_KEY_NVARCHAR),
                None => "nvarchar(max)".to_string(),
            },
            DataType::Char => with_args("nchar", precision, None),
            DataType::Int => "int".to_string(),
            DataType::BigInt => "bigint".to_string(),
            DataType::SmallInt => "smallint".to_string(),
            DataType::Decimal => with_args("decimal", precision, column.scale()),
            DataType::Bool => "bit".to_string(),
            DataType::Date => "date".to_string(),
            DataType::Timestamp => with_args("datetime2", precision, None),
            DataType::TimestampWithTz => with_args("datetimeoffset", precision, None),
        }
    }

    fn auto_sequence_clause(&self) -> Option<&'static str> {
        Some("IDENTITY(1,1)")
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            upsert: UpsertSupport::Unsupported,
            truncate_cascade: false,
            stream_source: false,
            row_rewrite: false,
            date_orders: true,
            alter_default: false,
            distinct_escape: false,
        }
    }

    fn drop_schema_sql(&self, schema: &str, cascade: bool) -> Result<String> {
        if cascade {
            return Err(TransferError::unsupported(self.name(), "DROP SCHEMA ... CASCADE"));
        }
        Ok(format!("DROP SCHEMA {}", self.quote_ident(schema)?))
    }

    fn paginate(&self, sql: &str, limit: Option<u64>, offset: Option<u64>) -> Result<String> {
        let parts = SelectParts::split(sql)?;
        match (limit, offset) {
            (None, None) => Ok(parts.to_string()),
            (Some(limit), None) => {
                let body = insert_top(&parts.body, limit)?;
                Ok(parts.assemble(&body, ""))
            }
            (limit, Some(offset)) => {
                if parts.order_by.is_none() {
                    return Err(TransferError::dialect_constraint(
                        self.name(),
                        "OFFSET requires an ORDER BY clause",
                    ));
                }
                let mut tail = format!("OFFSET {} ROWS", offset);
                if let Some(limit) = limit {
                    tail.push_str(&format!(" FETCH NEXT {} ROWS ONLY", limit));
                }
                Ok(parts.assemble(&parts.body, &tail))
            }
        }
    }
}

/// Insert `TOP (n)` after `SELECT [DISTINCT|ALL]`.
fn insert_top(body: &str, limit: u64) -> Result<String> {
    let mut words = body.split_whitespace();
    let first = words.next().unwrap_or("");
    if !first.eq_ignore_ascii_case("select") {
        return Err(TransferError::dialect_constraint(
            "mssql",
            "TOP can only be applied to a SELECT statement",
        ));
    }

    let trimmed = body.trim_start();
    let mut split_at = trimmed.len() - trimmed[first.len()..].len();
    let rest = &trimmed[split_at..];
    let rest_trimmed = rest.trim_start();
    let next = rest_trimmed.split_whitespace().next().unwrap_or("");
    if next.eq_ignore_ascii_case("distinct") || next.eq_ignore_ascii_case("all") {
        split_at += (rest.len() - rest_trimmed.len()) + next.len();
    }

    Ok(format!(
        "{} TOP ({}) {}",
        &trimmed[..split_at],
        limit,
        trimmed[split_at..].trim_start()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identifier::SlugStyle;

    fn col(spec: &str) -> Column {
        Column::parse(spec, SlugStyle::Snake).unwrap()
    }

    #[test]
    fn test_quote_ident() {
        let dialect = MssqlDialect::new();
        assert_eq!(dialect.quote_ident("users").unwrap(), "[users]");
        assert_eq!(dialect.quote_ident("user]name").unwrap(), "[user]]name]");
        assert_eq!(dialect.param_placeholder(1), "@P1");
    }

    #[test]
    fn test_column_types() {
        let dialect = MssqlDialect::new();
        assert_eq!(dialect.column_type(&col("id:bigint-pk-seq")), "bigint");
        assert_eq!(dialect.auto_sequence_clause(), Some("IDENTITY(1,1)"));
        assert_eq!(dialect.column_type(&col("n")), "nvarchar(max)");
        assert_eq!(dialect.column_type(&col("n:ix")), "nvarchar(450)");
        assert_eq!(dialect.column_type(&col("n:bool")), "bit");
        assert_eq!(dialect.column_type(&col("n:timestamp(3)")), "datetime2(3)");
        assert_eq!(dialect.column_type(&col("n:timestamptz")), "datetimeoffset");
    }

    #[test]
    fn test_paginate_top() {
        let dialect = MssqlDialect::new();
        assert_eq!(
            dialect.paginate("SELECT a FROM t", Some(5), None).unwrap(),
            "SELECT TOP (5) a FROM t"
        );
        assert_eq!(
            dialect
                .paginate("WITH x AS (SELECT 1 AS a) SELECT DISTINCT a FROM x ORDER BY a", Some(2), None)
                .unwrap(),
            "WITH x AS (SELECT 1 AS a) SELECT DISTINCT TOP (2) a FROM x ORDER BY a"
        );
    }

    #[test]
    fn test_paginate_offset_fetch() {
        let dialect = MssqlDialect::new();
        assert_eq!(
            dialect
                .paginate("SELECT a FROM t ORDER BY a", Some(10), Some(20))
                .unwrap(),
            "SELECT a FROM t ORDER BY a OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[test]
    fn test_paginate_offset_without_order_by_fails() {
        let dialect = MssqlDialect::new();
        let err = dialect
            .paginate("SELECT a FROM t", Some(10), Some(20))
            .unwrap_err();
        assert!(matches!(err, TransferError::DialectConstraint { .. }));
    }

    #[test]
    fn test_capabilities() {
        let caps = MssqlDialect::new().capabilities();
        assert_eq!(caps.upsert, UpsertSupport::Unsupported);
        assert!(!caps.stream_source);
        assert!(MssqlDialect::new().truncate_sql("dbo", "t", true).is_err());
    }
}
