//! # csvdb
//!
//! Bulk CSV import and export for PostgreSQL, MySQL/MariaDB and SQL Server.
//!
//! This library moves CSV files in and out of database tables using each
//! backend's native bulk protocol:
//!
//! - **PostgreSQL**: `COPY ... FROM STDIN` / `COPY ... TO STDOUT`, with upsert
//!   through a staging table and `INSERT ... ON CONFLICT`
//! - **MySQL/MariaDB**: `LOAD DATA LOCAL INFILE` streamed from the client
//!   (upsert is `REPLACE`)
//! - **SQL Server**: `BULK INSERT` from a server-visible path
//!
//! Around the bulk primitive it reconciles the file's header with the
//! table's columns, creates missing schemas and tables from compact column
//! specs (`id:int-pk-seq`), and sniffs the CSV dialect.
//!
//! ## Example
//!
//! ```rust,no_run
//! use csvdb::{ConnectionDescriptor, ImportJob, ImportOptions, MergePolicy, TransferEngine};
//!
//! #[tokio::main]
//! async fn main() -> csvdb::Result<()> {
//!     let engine = TransferEngine::default();
//!     let descriptor = ConnectionDescriptor::from_url("postgres://loader@localhost/warehouse")?;
//!
//!     let mut options = ImportOptions::new("people.csv");
//!     options.table = Some("staging.people".into());
//!     options.columns = vec!["id:int-pk".into(), "email:varchar(255)-ix".into()];
//!     options.merge = MergePolicy::Upsert;
//!
//!     let report = engine.import(descriptor, ImportJob::new(options)).await?;
//!     println!("Loaded {} rows into {}", report.rows, report.table);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod format;
pub mod schema;
pub mod transfer;

// Re-exports for convenient access
pub use config::{
    ConnectionDescriptor, CsvOptions, DateOrder, DbKind, ExportOptions, ImportOptions, JobConfig,
    MergePolicy, NumericFormat, SslMode,
};
pub use crate::core::{
    Capabilities, Column, ColumnDefault, DatabaseAdapter, DataType, Dialect, DriverCatalog,
    QueryOutcome, ResultMode, SlugStyle, UpsertSupport,
};
pub use drivers::DialectImpl;
pub use error::{Result, TransferError};
pub use format::{CsvDialect, DialectRegistry};
pub use transfer::{ExportJob, ImportJob, JobPhase, TransferEngine, TransferReport};
