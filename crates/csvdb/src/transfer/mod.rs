//! Import/export orchestration.
//!
//! A job moves through a fixed sequence of phases:
//!
//! ```text
//! INIT -> DIALECT-RESOLVED -> SCHEMA-RECONCILED -> TARGET-PREPARED
//!      -> BULK-IN-PROGRESS -> COMPLETE | FAILED
//! ```
//!
//! Capability checks happen in `INIT`, before a connection is opened.
//! Reconciliation finishes before any DDL or DML is sent. The connection is
//! closed exactly once on every path out of [`TransferEngine::import`] and
//! [`TransferEngine::export`].

mod export;
mod import;

pub use export::ExportJob;
pub use import::ImportJob;

use std::fmt;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{ConnectionDescriptor, JobConfig, TableRef};
use crate::core::catalog::DriverCatalog;
use crate::core::traits::DatabaseAdapter;
use crate::error::{Result, TransferError};
use crate::format::{CsvDialect, DialectRegistry};

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobPhase {
    Init,
    DialectResolved,
    SchemaReconciled,
    TargetPrepared,
    BulkInProgress,
    Complete,
    Failed,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobPhase::Init => "INIT",
            JobPhase::DialectResolved => "DIALECT-RESOLVED",
            JobPhase::SchemaReconciled => "SCHEMA-RECONCILED",
            JobPhase::TargetPrepared => "TARGET-PREPARED",
            JobPhase::BulkInProgress => "BULK-IN-PROGRESS",
            JobPhase::Complete => "COMPLETE",
            JobPhase::Failed => "FAILED",
        })
    }
}

/// Outcome of a completed job.
#[derive(Debug, Clone)]
pub struct TransferReport {
    /// Qualified table name.
    pub table: String,
    /// Rows loaded or unloaded.
    pub rows: u64,
    /// CSV bytes read (import) or written (export).
    pub bytes: u64,
    /// The CSV dialect the job ran with.
    pub dialect: CsvDialect,
    pub elapsed: Duration,
    pub phase: JobPhase,
}

/// Runs import and export jobs.
///
/// Holds the driver catalog and the named CSV dialects. Both are explicit
/// objects, so tests can register fake drivers or clear the presets.
#[derive(Clone)]
pub struct TransferEngine {
    catalog: DriverCatalog,
    dialects: DialectRegistry,
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new(DriverCatalog::with_builtins(), DialectRegistry::with_builtins())
    }
}

impl TransferEngine {
    pub fn new(catalog: DriverCatalog, dialects: DialectRegistry) -> Self {
        Self { catalog, dialects }
    }

    pub fn catalog(&self) -> &DriverCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut DriverCatalog {
        &mut self.catalog
    }

    pub fn dialects(&self) -> &DialectRegistry {
        &self.dialects
    }

    pub fn dialects_mut(&mut self) -> &mut DialectRegistry {
        &mut self.dialects
    }

    /// Connect, run an import and close the connection.
    pub async fn import(
        &self,
        descriptor: ConnectionDescriptor,
        job: ImportJob,
    ) -> Result<TransferReport> {
        let caps = self.catalog.capabilities(descriptor.kind())?;
        job.check_capabilities(descriptor.kind().name(), &caps)?;

        let label = job.label();
        let mut adapter = self.open(descriptor, &label).await?;
        let result = job.run(self, adapter.as_mut()).await;
        finish(adapter, result).await
    }

    /// Connect, run an export and close the connection.
    pub async fn export(
        &self,
        descriptor: ConnectionDescriptor,
        job: ExportJob,
    ) -> Result<TransferReport> {
        // fails for unregistered backends before connecting
        self.catalog.capabilities(descriptor.kind())?;

        let label = job.label();
        let mut adapter = self.open(descriptor, &label).await?;
        let result = job.run(self, adapter.as_mut()).await;
        finish(adapter, result).await
    }

    /// Run the import or export described by a job file.
    pub async fn run_job(&self, config: &JobConfig) -> Result<TransferReport> {
        config.validate()?;
        let descriptor = config.connection.descriptor()?;
        match (&config.import, &config.export) {
            (Some(import), _) => {
                self.import(descriptor, ImportJob::new(import.clone())).await
            }
            (None, Some(export)) => {
                self.export(descriptor, ExportJob::new(export.clone())).await
            }
            (None, None) => Err(TransferError::Config(
                "job needs an 'import' or an 'export' section".into(),
            )),
        }
    }

    async fn open(
        &self,
        descriptor: ConnectionDescriptor,
        label: &(String, String),
    ) -> Result<Box<dyn DatabaseAdapter>> {
        info!("Connecting to {}", descriptor.redacted());
        self.catalog
            .connect(descriptor)
            .await
            .map_err(|e| e.in_job(JobPhase::Init, &label.0, &label.1))
    }
}

/// Close the adapter and combine the close result with the job result. A
/// job error wins over a close error.
async fn finish(
    mut adapter: Box<dyn DatabaseAdapter>,
    result: Result<TransferReport>,
) -> Result<TransferReport> {
    let closed = adapter.close().await;
    match (result, closed) {
        (Ok(report), Ok(())) => Ok(report),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!("Closing the connection after a failed job also failed: {}", close_err);
            Err(e)
        }
    }
}

/// Resolve the job's table against the connection's bound table and schema.
fn resolve_table(
    table: Option<&str>,
    descriptor: &ConnectionDescriptor,
) -> Result<(String, String)> {
    let table_ref = match table {
        Some(qualified) => TableRef::parse(qualified)?,
        None => {
            let name = descriptor.bound_table().ok_or_else(|| {
                TransferError::Config(
                    "table is required (in the job or in the connection URL)".into(),
                )
            })?;
            TableRef {
                schema: descriptor.bound_schema().map(str::to_string),
                name: name.to_string(),
            }
        }
    };
    Ok(table_ref.resolve(descriptor))
}

/// Phase bookkeeping shared by both job kinds.
#[derive(Debug)]
struct PhaseTracker {
    phase: JobPhase,
    label: (String, String),
}

impl PhaseTracker {
    fn new(label: (String, String)) -> Self {
        Self {
            phase: JobPhase::Init,
            label,
        }
    }

    fn advance(&mut self, phase: JobPhase) {
        tracing::debug!("{}: {} -> {}", self.label.0, self.phase, phase);
        self.phase = phase;
    }

    fn set_table(&mut self, schema: &str, table: &str) {
        self.label.0 = format!("{}.{}", schema, table);
    }

    /// Annotate an error with the phase it happened in and mark the job failed.
    fn fail(&mut self, error: TransferError) -> TransferError {
        let failed_in = self.phase;
        self.advance(JobPhase::Failed);
        error.in_job(failed_in, &self.label.0, &self.label.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DbKind;

    #[test]
    fn test_phase_display() {
        assert_eq!(JobPhase::Init.to_string(), "INIT");
        assert_eq!(JobPhase::SchemaReconciled.to_string(), "SCHEMA-RECONCILED");
        assert_eq!(JobPhase::BulkInProgress.to_string(), "BULK-IN-PROGRESS");
    }

    #[test]
    fn test_resolve_table() {
        let descriptor = ConnectionDescriptor::new(DbKind::Postgres, "localhost", "db");
        assert_eq!(
            resolve_table(Some("staging.people"), &descriptor).unwrap(),
            ("staging".to_string(), "people".to_string())
        );
        assert_eq!(
            resolve_table(Some("people"), &descriptor).unwrap(),
            ("public".to_string(), "people".to_string())
        );
        assert!(resolve_table(None, &descriptor).is_err());

        let bound = ConnectionDescriptor::from_url("mssql://sa@host/db/sales.orders").unwrap();
        assert_eq!(
            resolve_table(None, &bound).unwrap(),
            ("sales".to_string(), "orders".to_string())
        );
    }

    #[test]
    fn test_tracker_annotates_backend_errors() {
        let mut tracker = PhaseTracker::new(("t".into(), "f.csv".into()));
        tracker.set_table("public", "t");
        tracker.advance(JobPhase::BulkInProgress);
        let err = tracker.fail(TransferError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "gone",
        )));
        assert_eq!(tracker.phase, JobPhase::Failed);
        match err {
            TransferError::Job { phase, table, .. } => {
                assert_eq!(phase, JobPhase::BulkInProgress);
                assert_eq!(table, "public.t");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
