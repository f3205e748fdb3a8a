//! Database driver implementations.
//!
//! - [`postgres`]: PostgreSQL driver (`COPY`)
//! - [`mysql`]: MySQL/MariaDB driver (`LOAD DATA LOCAL INFILE`, feature `mysql`)
//! - [`mssql`]: Microsoft SQL Server driver (`BULK INSERT`)
//! - [`common`]: Shared utilities (TLS, naming helpers)
//!
//! # Architecture
//!
//! Each driver module provides:
//! - a `Dialect`: SQL syntax strategy for the engine
//! - a typed column-info struct with one conversion into [`Column`](crate::core::Column)
//! - a `DatabaseAdapter`: live connection plus the native bulk primitive
//!
//! # Adding New Databases
//!
//! 1. Create a new module under `drivers/`
//! 2. Implement `Dialect` and `DatabaseAdapter`
//! 3. Add an enum variant to `DialectImpl`
//! 4. Register the connector in `DriverCatalog::with_builtins()`
//! 5. Gate the driver with a feature flag in `Cargo.toml`

pub mod common;
pub mod mssql;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod postgres;

pub use common::TlsBuilder;
pub use mssql::{MssqlAdapter, MssqlDialect};
#[cfg(feature = "mysql")]
pub use mysql::{MysqlAdapter, MysqlDialect};
pub use postgres::{PostgresAdapter, PostgresDialect};

use crate::config::DbKind;
use crate::core::column::Column;
use crate::core::traits::{Capabilities, Dialect};
use crate::error::{Result, TransferError};

/// Enum-based static dispatch for dialects.
///
/// The compiler generates a match statement instead of using vtable
/// dispatch. Manual impl rather than a macro crate, so feature-gated
/// variants stay readable.
#[derive(Debug, Clone)]
pub enum DialectImpl {
    Postgres(PostgresDialect),
    #[cfg(feature = "mysql")]
    Mysql(MysqlDialect),
    Mssql(MssqlDialect),
}

macro_rules! dispatch {
    ($self:ident, $d:ident => $call:expr) => {
        match $self {
            DialectImpl::Postgres($d) => $call,
            #[cfg(feature = "mysql")]
            DialectImpl::Mysql($d) => $call,
            DialectImpl::Mssql($d) => $call,
        }
    };
}

impl Dialect for DialectImpl {
    fn name(&self) -> &str {
        dispatch!(self, d => d.name())
    }

    fn kind(&self) -> DbKind {
        dispatch!(self, d => d.kind())
    }

    fn quote_ident(&self, name: &str) -> Result<String> {
        dispatch!(self, d => d.quote_ident(name))
    }

    fn escape_literal(&self, value: &str) -> String {
        dispatch!(self, d => d.escape_literal(value))
    }

    fn qualify(&self, schema: &str, table: &str) -> Result<String> {
        dispatch!(self, d => d.qualify(schema, table))
    }

    fn param_placeholder(&self, index: usize) -> String {
        dispatch!(self, d => d.param_placeholder(index))
    }

    fn default_temporal_precision(&self) -> u32 {
        dispatch!(self, d => d.default_temporal_precision())
    }

    fn column_type(&self, column: &Column) -> String {
        dispatch!(self, d => d.column_type(column))
    }

    fn auto_sequence_clause(&self) -> Option<&'static str> {
        dispatch!(self, d => d.auto_sequence_clause())
    }

    fn capabilities(&self) -> Capabilities {
        dispatch!(self, d => d.capabilities())
    }

    fn create_schema_sql(&self, schema: &str) -> Result<String> {
        dispatch!(self, d => d.create_schema_sql(schema))
    }

    fn drop_schema_sql(&self, schema: &str, cascade: bool) -> Result<String> {
        dispatch!(self, d => d.drop_schema_sql(schema, cascade))
    }

    fn drop_table_sql(&self, schema: &str, table: &str) -> Result<String> {
        dispatch!(self, d => d.drop_table_sql(schema, table))
    }

    fn truncate_sql(&self, schema: &str, table: &str, cascade: bool) -> Result<String> {
        dispatch!(self, d => d.truncate_sql(schema, table, cascade))
    }

    fn set_default_sql(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        expression: &str,
    ) -> Result<String> {
        dispatch!(self, d => d.set_default_sql(schema, table, column, expression))
    }

    fn paginate(&self, sql: &str, limit: Option<u64>, offset: Option<u64>) -> Result<String> {
        dispatch!(self, d => d.paginate(sql, limit, offset))
    }
}

impl DialectImpl {
    /// The dialect for a backend kind.
    ///
    /// # Errors
    ///
    /// Returns an error when the backend's driver is not compiled in.
    pub fn from_kind(kind: DbKind) -> Result<Self> {
        match kind {
            DbKind::Postgres => Ok(DialectImpl::Postgres(PostgresDialect::new())),
            #[cfg(feature = "mysql")]
            DbKind::Mysql => Ok(DialectImpl::Mysql(MysqlDialect::new())),
            #[cfg(not(feature = "mysql"))]
            DbKind::Mysql => Err(TransferError::unsupported(
                "mysql",
                "driver not compiled in (enable the `mysql` feature)",
            )),
            DbKind::Mssql => Ok(DialectImpl::Mssql(MssqlDialect::new())),
        }
    }

    /// Create a dialect implementation from a database type string.
    ///
    /// # Errors
    ///
    /// Returns an error if the database type is not recognized.
    pub fn from_db_type(db_type: &str) -> Result<Self> {
        let kind = DbKind::from_scheme(db_type)
            .or(match db_type.to_ascii_lowercase().as_str() {
                "sql_server" => Some(DbKind::Mssql),
                _ => None,
            })
            .ok_or_else(|| {
                TransferError::Config(format!(
                    "Unknown database type: '{}'. Supported types: postgres, mysql, mssql",
                    db_type
                ))
            })?;
        Self::from_kind(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_impl_from_db_type() {
        let mssql = DialectImpl::from_db_type("mssql").unwrap();
        assert_eq!(mssql.name(), "mssql");

        let postgres = DialectImpl::from_db_type("postgres").unwrap();
        assert_eq!(postgres.name(), "postgres");

        // Alternative names
        assert!(DialectImpl::from_db_type("sqlserver").is_ok());
        assert!(DialectImpl::from_db_type("sql_server").is_ok());
        assert!(DialectImpl::from_db_type("postgresql").is_ok());
        assert!(DialectImpl::from_db_type("pg").is_ok());

        assert!(DialectImpl::from_db_type("unknown").is_err());
    }

    #[test]
    fn test_dialect_impl_dispatch() {
        let dialect = DialectImpl::Postgres(PostgresDialect::new());
        assert_eq!(dialect.name(), "postgres");
        assert_eq!(dialect.kind(), DbKind::Postgres);
        assert_eq!(dialect.quote_ident("table").unwrap(), "\"table\"");
        assert_eq!(dialect.param_placeholder(1), "$1");
    }

    #[test]
    fn test_dialect_impl_mssql() {
        let dialect = DialectImpl::Mssql(MssqlDialect::new());
        assert_eq!(dialect.name(), "mssql");
        assert_eq!(dialect.quote_ident("table").unwrap(), "[table]");
        assert_eq!(dialect.param_placeholder(1), "@P1");
        assert!(dialect.truncate_sql("dbo", "t", true).is_err());
    }

    #[cfg(feature = "mysql")]
    #[test]
    fn test_dialect_impl_mysql() {
        let dialect = DialectImpl::from_kind(DbKind::Mysql).unwrap();
        assert_eq!(dialect.quote_ident("t").unwrap(), "`t`");
        assert_eq!(dialect.escape_literal("a\\b"), "'a\\\\b'");
    }
}
