//! Schema reconciliation and DDL generation.
//!
//! Both halves are pure: they turn column lists into column lists or SQL
//! text and never touch a connection. The transfer engine runs them before
//! any statement is sent, so a reconciliation error leaves the database
//! untouched.

pub mod ddl;
pub mod reconcile;

pub use ddl::TableDdl;
pub use reconcile::{
    merge, reconcile_export, reconcile_file, reconcile_import, ImportSchema, Merged,
};
