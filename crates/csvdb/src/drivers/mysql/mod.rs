//! MySQL/MariaDB driver.
//!
//! - [`MysqlDialect`]: SQL syntax strategy
//! - [`MysqlAdapter`]: connection with `LOAD DATA LOCAL INFILE` loads
//! - [`MysqlColumnInfo`]: typed `information_schema` column metadata
//!
//! # Feature Flag
//!
//! This module is only available when the `mysql` feature is enabled
//! (on by default).
//!
//! # Upsert
//!
//! `MergePolicy::Upsert` maps to `LOAD DATA ... REPLACE`, which deletes and
//! re-inserts conflicting rows. Unlike the PostgreSQL path it does not merge
//! column by column: columns absent from the file take their defaults, and
//! delete triggers and foreign-key actions fire.

mod adapter;
mod dialect;
mod introspect;

pub use adapter::MysqlAdapter;
pub use dialect::MysqlDialect;
pub use introspect::MysqlColumnInfo;
