//! Table -> CSV jobs.

use std::time::Instant;

use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{info, warn};

use crate::config::{validate_export, ExportOptions};
use crate::core::column::Column;
use crate::core::traits::{BulkUnload, DatabaseAdapter};
use crate::error::{Result, TransferError};
use crate::format::{backend_encoding, CsvDialect};
use crate::schema::reconcile_export;

use super::{resolve_table, JobPhase, PhaseTracker, TransferEngine, TransferReport};

/// One table (optionally filtered) written to one CSV file or stream.
#[derive(Debug, Clone)]
pub struct ExportJob {
    options: ExportOptions,
}

impl ExportJob {
    pub fn new(options: ExportOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ExportOptions {
        &self.options
    }

    pub(super) fn label(&self) -> (String, String) {
        (
            self.options.table.clone().unwrap_or_default(),
            self.options.file.display().to_string(),
        )
    }

    /// Write to `options.file`, replacing it, on an open connection. The
    /// caller owns (and closes) the adapter.
    pub async fn run(
        self,
        engine: &TransferEngine,
        adapter: &mut dyn DatabaseAdapter,
    ) -> Result<TransferReport> {
        let mut tracker = PhaseTracker::new(self.label());
        let file = self.options.file.clone();

        match self.execute(engine, adapter, &mut tracker, None).await {
            Ok(report) => Ok(report),
            Err(e) => {
                // a partial export is worse than none
                if tracker.phase >= JobPhase::TargetPrepared {
                    if let Err(remove_err) = tokio::fs::remove_file(&file).await {
                        warn!(
                            "Could not remove partial export {}: {}",
                            file.display(),
                            remove_err
                        );
                    }
                }
                Err(tracker.fail(e))
            }
        }
    }

    /// Write to `out` instead of a file; `options.file` only labels the job.
    /// `out` is flushed but not shut down.
    pub async fn run_to_writer(
        self,
        engine: &TransferEngine,
        adapter: &mut dyn DatabaseAdapter,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<TransferReport> {
        let mut tracker = PhaseTracker::new(self.label());
        match self.execute(engine, adapter, &mut tracker, Some(out)).await {
            Ok(report) => Ok(report),
            Err(e) => Err(tracker.fail(e)),
        }
    }

    async fn execute(
        self,
        engine: &TransferEngine,
        adapter: &mut dyn DatabaseAdapter,
        tracker: &mut PhaseTracker,
        out: Option<&mut (dyn AsyncWrite + Unpin + Send)>,
    ) -> Result<TransferReport> {
        let started = Instant::now();

        // ===== INIT =====
        validate_export(&self.options)?;
        let ExportJob { options } = self;
        let (schema, table) = resolve_table(options.table.as_deref(), adapter.descriptor())?;
        tracker.set_table(&schema, &table);
        let requested: Vec<Column> = options
            .columns
            .iter()
            .map(|name| Column::verbatim(name.trim()))
            .collect();

        // ===== DIALECT-RESOLVED =====
        let dialect = CsvDialect::resolve(&options.csv, None, engine.dialects())?;
        backend_encoding(adapter.dialect().kind(), dialect.encoding)?;
        tracker.advance(JobPhase::DialectResolved);

        // ===== SCHEMA-RECONCILED =====
        let table_columns = adapter
            .get_table_columns(&schema, &table)
            .await?
            .ok_or_else(|| {
                TransferError::reconcile(format!("table {}.{} does not exist", schema, table))
            })?;
        let columns = reconcile_export(&requested, &table_columns)?;
        tracker.advance(JobPhase::SchemaReconciled);

        // ===== TARGET-PREPARED =====
        let mut file_writer;
        let out: &mut (dyn AsyncWrite + Unpin + Send) = match out {
            Some(out) => out,
            None => {
                file_writer = BufWriter::new(tokio::fs::File::create(&options.file).await?);
                &mut file_writer
            }
        };
        tracker.advance(JobPhase::TargetPrepared);

        // ===== BULK-IN-PROGRESS =====
        tracker.advance(JobPhase::BulkInProgress);
        let summary = adapter
            .bulk_unload(
                BulkUnload {
                    schema: &schema,
                    table: &table,
                    columns: &columns,
                    where_clause: options.where_clause.as_deref(),
                    dialect: &dialect,
                    block_size: options.csv.block_size,
                },
                &mut *out,
            )
            .await?;
        out.flush().await?;

        // ===== COMPLETE =====
        tracker.advance(JobPhase::Complete);
        let elapsed = started.elapsed();
        info!(
            "Exported {} rows ({} bytes) from {}.{} in {:.2?}",
            summary.rows, summary.bytes, schema, table, elapsed
        );
        Ok(TransferReport {
            table: format!("{}.{}", schema, table),
            rows: summary.rows,
            bytes: summary.bytes,
            dialect,
            elapsed,
            phase: JobPhase::Complete,
        })
    }
}
