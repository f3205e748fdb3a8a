//! Core abstractions for database-agnostic CSV transfer.
//!
//! - [`column`]: column model and compact spec parser
//! - [`identifier`]: identifier validation, quoting, literals and slugs
//! - [`query`]: query parameters and SELECT splitting for pagination
//! - [`traits`]: `Dialect`, `DatabaseAdapter` and bulk request types
//! - [`catalog`]: driver registry for dependency injection
//!
//! # Design Patterns
//!
//! - **Registry**: `DriverCatalog` maps URL schemes to connectors
//! - **Strategy**: `Dialect` provides interchangeable SQL syntax rules
//! - **Template Method**: default `DatabaseAdapter` methods build on two primitives

pub mod catalog;
pub mod column;
pub mod identifier;
pub mod query;
pub mod traits;

pub use catalog::{connector, Connector, DriverCatalog};
pub use column::{Column, ColumnDefault, DataType};
pub use identifier::SlugStyle;
pub use query::{SelectParts, SqlParam};
pub use traits::{
    BulkLoad, BulkUnload, Capabilities, CsvSource, DatabaseAdapter, Dialect, QueryOutcome,
    ResultMode, RowSink, UnloadSummary, UpsertSupport,
};
