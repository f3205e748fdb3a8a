//! PostgreSQL driver.
//!
//! - [`PostgresDialect`]: SQL syntax strategy for PostgreSQL
//! - [`PostgresAdapter`]: connection with `COPY` bulk load/unload and
//!   staging-table upsert
//! - [`PgColumnInfo`]: typed `information_schema` column metadata

mod adapter;
mod dialect;
mod introspect;

pub use adapter::PostgresAdapter;
pub use dialect::PostgresDialect;
pub use introspect::PgColumnInfo;
