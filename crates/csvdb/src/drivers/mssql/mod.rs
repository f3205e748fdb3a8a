//! Microsoft SQL Server driver.
//!
//! - [`MssqlDialect`]: SQL syntax strategy for MSSQL
//! - [`MssqlAdapter`]: connection with `BULK INSERT` loads
//! - [`MssqlColumnInfo`]: typed `INFORMATION_SCHEMA` column metadata
//!
//! `BULK INSERT` reads the file on the server, so loads need a file path that
//! the server can see. Upsert is not available on this backend.

mod adapter;
mod dialect;
mod introspect;

pub use adapter::MssqlAdapter;
pub use dialect::MssqlDialect;
pub use introspect::MssqlColumnInfo;
