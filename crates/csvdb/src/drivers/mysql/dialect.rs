//! MySQL/MariaDB SQL dialect.
//!
//! Uses backtick identifier quoting and `?` placeholders. Literals also
//! escape backslashes, which MySQL treats as an escape character by default.

use crate::config::DbKind;
use crate::core::column::{Column, ColumnDefault, DataType};
use crate::core::identifier::{escape_literal_mysql, quote_mysql};
use crate::core::query::SelectParts;
use crate::core::traits::{Capabilities, Dialect, UpsertSupport};
use crate::drivers::common::with_args;
use crate::error::Result;

/// Largest LIMIT MySQL accepts; used for OFFSET without LIMIT.
const MAX_LIMIT: u64 = u64::MAX;

/// MySQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for MysqlDialect {
    fn name(&self) -> &str {
        "mysql"
    }

    fn kind(&self) -> DbKind {
        DbKind::Mysql
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_mysql(name)
    }

    fn escape_literal(&self, value: &str) -> String {
        escape_literal_mysql(value)
    }

    fn param_placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn default_temporal_precision(&self) -> u32 {
        0
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
            // TEXT cannot be indexed without a prefix length
            DataType::Text if keyed => "varchar(255)".to_string(),
            DataType::Text => "text".to_string(),
            DataType::Varchar => with_args("varchar", precision.or(Some(255)), None),
            DataType::Char => with_args("char", precision, None),
            DataType::Int => "int".to_string(),
            DataType::BigInt => "bigint".to_string(),
            DataType::SmallInt => "smallint".to_string(),
            DataType::Decimal => with_args("decimal", precision, column.scale()),
            DataType::Bool => "boolean".to_string(),
            DataType::Date => "date".to_string(),
            DataType::Timestamp => with_args("datetime", precision, None),
            DataType::TimestampWithTz => with_args("timestamp", precision, None),
        }
    }

    fn auto_sequence_clause(&self) -> Option<&'static str> {
        Some("AUTO_INCREMENT")
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            upsert: UpsertSupport::Replace,
            truncate_cascade: false,
            stream_source: true,
            row_rewrite: true,
            date_orders: false,
            alter_default: true,
            distinct_escape: true,
        }
    }

    fn drop_schema_sql(&self, schema: &str, _cascade: bool) -> Result<String> {
        // DROP SCHEMA always removes the contained tables in MySQL
        Ok(format!("DROP SCHEMA {}", self.quote_ident(schema)?))
    }

    fn paginate(&self, sql: &str, limit: Option<u64>, offset: Option<u64>) -> Result<String> {
        let parts = SelectParts::split(sql)?;
        let tail = match (limit, offset) {
            (Some(limit), Some(offset)) => format!("LIMIT {} OFFSET {}", limit, offset),
            (Some(limit), None) => format!("LIMIT {}", limit),
            (None, Some(offset)) => format!("LIMIT {} OFFSET {}", MAX_LIMIT, offset),
            (None, None) => String::new(),
        };
        Ok(parts.assemble(&parts.body, &tail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identifier::SlugStyle;

    fn col(spec: &str) -> Column {
        Column::parse(spec, SlugStyle::Snake).unwrap()
    }

    #[test]
    fn test_quote_and_escape() {
        let dialect = MysqlDialect::new();
        assert_eq!(dialect.quote_ident("order").unwrap(), "`order`");
        assert_eq!(dialect.escape_literal("C:\\tmp\\a.csv"), "'C:\\\\tmp\\\\a.csv'");
        assert_eq!(dialect.param_placeholder(3), "?");
    }

    #[test]
    fn test_column_types() {
        let dialect = MysqlDialect::new();
        assert_eq!(dialect.column_type(&col("id:int-pk-seq")), "int");
        assert_eq!(dialect.auto_sequence_clause(), Some("AUTO_INCREMENT"));
        assert_eq!(dialect.column_type(&col("id:seq")), "int");
        assert_eq!(dialect.column_type(&col("code:pk")), "varchar(255)");
        assert_eq!(dialect.column_type(&col("n")), "text");
        assert_eq!(dialect.column_type(&col("n:varchar")), "varchar(255)");
        assert_eq!(dialect.column_type(&col("n:timestamp(3)")), "datetime(3)");
        assert_eq!(dialect.column_type(&col("n:timestamptz")), "timestamp");
    }

    #[test]
    fn test_paginate_offset_without_limit() {
        let dialect = MysqlDialect::new();
        assert_eq!(
            dialect.paginate("SELECT a FROM t", None, Some(3)).unwrap(),
            format!("SELECT a FROM t LIMIT {} OFFSET 3", u64::MAX)
        );
    }

    #[test]
    fn test_truncate_cascade_unsupported() {
        let dialect = MysqlDialect::new();
        assert!(dialect.truncate_sql("db", "t", true).is_err());
        assert_eq!(
            dialect.truncate_sql("db", "t", false).unwrap(),
            "TRUNCATE TABLE `db`.`t`"
        );
    }
}
