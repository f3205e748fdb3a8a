//! PostgreSQL SQL dialect (Strategy pattern).
//!
//! Provides PostgreSQL-specific SQL syntax for identifier quoting, column
//! types, pagination and parameter placeholders.

use crate::config::DbKind;
use crate::core::column::{Column, ColumnDefault, DataType};
use crate::core::identifier::quote_pg;
use crate::core::query::SelectParts;
use crate::core::traits::{Capabilities, Dialect, UpsertSupport};
use crate::drivers::common::with_args;
use crate::error::Result;

/// PostgreSQL dialect implementation.
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl PostgresDialect {
    /// Create a new PostgreSQL dialect instance.
    pub fn new() -> Self {
        Self
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &str {
        "postgres"
    }

    fn kind(&self) -> DbKind {
        DbKind::Postgres
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        quote_pg(name)
    }

    fn param_placeholder(&self, index: usize) -> String {
        format!("${}", index)
    }

    fn default_temporal_precision(&self) -> u32 {
        6
    }

    fn column_type(&self, column: &Column) -> String {
        let data_type = column.effective_type();
        if column.default() == &ColumnDefault::AutoSequence {
            // serial types carry their own sequence default
            return match data_type {
                DataType::BigInt => "bigserial",
                DataType::SmallInt => "smallserial",
                _ => "serial",
            }
            .to_string();
        }

        let precision = column.precision();
        match data_type {
            DataType::Text => "text".to_string(),
            DataType::Varchar => with_args("varchar", precision, None),
            DataType::Char => with_args("char", precision, None),
            DataType::Int => "integer".to_string(),
            DataType::BigInt => "bigint".to_string(),
            DataType::SmallInt => "smallint".to_string(),
            DataType::Decimal => with_args("numeric", precision, column.scale()),
            DataType::Bool => "boolean".to_string(),
            DataType::Date => "date".to_string(),
            DataType::Timestamp => with_args("timestamp", precision, None),
            DataType::TimestampWithTz => with_args("timestamptz", precision, None),
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            upsert: UpsertSupport::Native,
            truncate_cascade: true,
            stream_source: true,
            row_rewrite: true,
            date_orders: true,
            alter_default: true,
            distinct_escape: true,
        }
    }

    fn paginate(&self, sql: &str, limit: Option<u64>, offset: Option<u64>) -> Result<String> {
        let parts = SelectParts::split(sql)?;
        let mut tail = Vec::new();
        if let Some(limit) = limit {
            tail.push(format!("LIMIT {}", limit));
        }
        if let Some(offset) = offset {
            tail.push(format!("OFFSET {}", offset));
        }
        Ok(parts.assemble(&parts.body, &tail.join(" ")))
    }
}
