//! CSV -> table jobs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::io::AsyncRead;
use tracing::{debug, info};

use crate::config::{validate_import, DateOrder, ImportOptions, MergePolicy, NumericFormat};
use crate::core::column::Column;
use crate::core::traits::{BulkLoad, Capabilities, CsvSource, DatabaseAdapter, UpsertSupport};
use crate::error::{Result, TransferError};
use crate::format::{backend_encoding, rewrite_numeric, CsvDialect, CsvInput};
use crate::schema::{reconcile_file, reconcile_import, TableDdl};

use super::{resolve_table, JobPhase, PhaseTracker, TransferEngine, TransferReport};

/// One CSV file (or stream) loaded into one table.
pub struct ImportJob {
    options: ImportOptions,
    reader: Option<Box<dyn AsyncRead + Send + Unpin>>,
}

/// What TARGET-PREPARED has to do, computed before any statement is sent.
enum TargetPlan {
    /// Drop (when present) and create the table.
    Create {
        drop_existing: bool,
        statements: Vec<String>,
    },
    /// Keep the table; apply `(column, expression)` defaults first.
    Existing { defaults: Vec<(String, String)> },
}

impl ImportJob {
    /// Load `options.file`.
    pub fn new(options: ImportOptions) -> Self {
        Self {
            options,
            reader: None,
        }
    }

    /// Load from an in-memory stream. `options.file` only labels the job;
    /// `filename`/`filepath` defaults are not available.
    pub fn from_reader<R>(options: ImportOptions, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            options,
            reader: Some(Box::new(reader)),
        }
    }

    pub fn options(&self) -> &ImportOptions {
        &self.options
    }

    fn numeric_rewrite(&self) -> Option<NumericFormat> {
        self.options.numeric.filter(|n| !n.is_identity())
    }

    pub(super) fn label(&self) -> (String, String) {
        (
            self.options.table.clone().unwrap_or_default(),
            self.options.file.display().to_string(),
        )
    }

    /// Fail fast when the backend cannot run this job as configured.
    pub fn check_capabilities(&self, backend: &str, caps: &Capabilities) -> Result<()> {
        let options = &self.options;
        if options.merge == MergePolicy::Upsert && caps.upsert == UpsertSupport::Unsupported {
            return Err(TransferError::unsupported(backend, "upsert"));
        }
        if options.merge == MergePolicy::TruncateCascade && !caps.truncate_cascade {
            return Err(TransferError::unsupported(backend, "TRUNCATE ... CASCADE"));
        }
        if self.reader.is_some() && !caps.stream_source {
            return Err(TransferError::unsupported(
                backend,
                "bulk load from an in-memory stream",
            ));
        }
        if self.numeric_rewrite().is_some() && !caps.row_rewrite {
            return Err(TransferError::unsupported(
                backend,
                "numeric rewriting (row-by-row load)",
            ));
        }
        let quote = options.csv.quote.unwrap_or('"');
        if options.csv.escape.map_or(false, |e| e != quote) && !caps.distinct_escape {
            return Err(TransferError::unsupported(backend, "distinct escape character"));
        }
        if options.date_order != DateOrder::Ymd && !caps.date_orders {
            return Err(TransferError::unsupported(
                backend,
                format!("date order {}", options.date_order),
            ));
        }
        Ok(())
    }

    /// Run on an open connection. The caller owns (and closes) the adapter.
    pub async fn run(
        self,
        engine: &TransferEngine,
        adapter: &mut dyn DatabaseAdapter,
    ) -> Result<TransferReport> {
        let mut tracker = PhaseTracker::new(self.label());
        match self.execute(engine, adapter, &mut tracker).await {
            Ok(report) => Ok(report),
            Err(e) => Err(tracker.fail(e)),
        }
    }

    async fn execute(
        self,
        engine: &TransferEngine,
        adapter: &mut dyn DatabaseAdapter,
        tracker: &mut PhaseTracker,
    ) -> Result<TransferReport> {
        let started = Instant::now();

        // ===== INIT =====
        validate_import(&self.options)?;
        let backend = adapter.dialect().name().to_string();
        let caps = adapter.dialect().capabilities();
        self.check_capabilities(&backend, &caps)?;
        let numeric = self.numeric_rewrite();

        let ImportJob { options, reader } = self;
        let (schema, table) = resolve_table(options.table.as_deref(), adapter.descriptor())?;
        tracker.set_table(&schema, &table);

        let specs = options
            .columns
            .iter()
            .map(|spec| Column::parse(spec, options.slug_style))
            .collect::<Result<Vec<_>>>()?;

        // ===== DIALECT-RESOLVED =====
        let sample_size = options.csv.sample_size;
        let input = match reader {
            Some(reader) => CsvInput::from_reader(reader, sample_size).await?,
            None => CsvInput::open(&options.file, sample_size).await?,
        };
        let dialect = CsvDialect::resolve(&options.csv, Some(input.sample()), engine.dialects())?;
        backend_encoding(adapter.dialect().kind(), dialect.encoding)?;
        // a named dialect can bring its own escape
        if !dialect.doublequote() && !caps.distinct_escape {
            return Err(TransferError::unsupported(&backend, "distinct escape character"));
        }
        let source_path: Option<PathBuf> = match input.path() {
            Some(path) => Some(tokio::fs::canonicalize(path).await?),
            None => None,
        };
        if input.had_bom() {
            debug!("Skipped UTF-8 byte order mark");
        }
        tracker.advance(JobPhase::DialectResolved);

        // ===== SCHEMA-RECONCILED =====
        let header: Option<Vec<Column>> = if dialect.header {
            let names = input.read_header(&dialect)?.unwrap_or_default();
            Some(
                names
                    .into_iter()
                    .map(|name| Column::new(name, options.slug_style))
                    .collect(),
            )
        } else {
            None
        };
        let mut columns = reconcile_file(header.as_deref(), &specs)?;

        let existing = adapter.get_table_columns(&schema, &table).await?;
        if let (Some(table_columns), false) = (&existing, options.recreate) {
            // match in the file's slug style; reconcile binds back to real names
            let table_columns: Vec<Column> = table_columns
                .iter()
                .cloned()
                .map(|c| c.restyled(options.slug_style))
                .collect();
            columns = reconcile_import(columns, &table_columns)?;
            if columns.file_defaults().next().is_some() && !caps.alter_default {
                return Err(TransferError::unsupported(
                    &backend,
                    "filename/filepath defaults on an existing table (ALTER COLUMN ... SET DEFAULT)",
                ));
            }
        }

        let plan = {
            let ddl = TableDdl::new(adapter.dialect(), &schema, &table)
                .with_source(source_path.as_deref());
            if existing.is_none() || options.recreate {
                TargetPlan::Create {
                    drop_existing: existing.is_some(),
                    statements: ddl.statements(&columns.table_columns())?,
                }
            } else {
                let defaults = columns
                    .file_defaults()
                    .map(|c| {
                        let expr = ddl.default_expression(c)?.unwrap_or_default();
                        Ok((c.slug().to_string(), expr))
                    })
                    .collect::<Result<Vec<_>>>()?;
                TargetPlan::Existing { defaults }
            }
        };
        tracker.advance(JobPhase::SchemaReconciled);

        // ===== TARGET-PREPARED =====
        match plan {
            TargetPlan::Create {
                drop_existing,
                statements,
            } => {
                if drop_existing {
                    info!("Recreating {}.{}", schema, table);
                    adapter.drop_table(&schema, &table).await?;
                }
                if !adapter.schema_exists(&schema).await? {
                    adapter.create_schema(&schema).await?;
                }
                for sql in &statements {
                    debug!("DDL: {}", sql);
                    adapter.execute_statement(sql, &[]).await?;
                }
            }
            TargetPlan::Existing { defaults } => {
                for (column, expr) in &defaults {
                    adapter
                        .set_column_default(&schema, &table, column, expr)
                        .await?;
                }
                match options.merge {
                    MergePolicy::Truncate => adapter.truncate_table(&schema, &table, false).await?,
                    MergePolicy::TruncateCascade => {
                        adapter.truncate_table(&schema, &table, true).await?
                    }
                    MergePolicy::None | MergePolicy::Upsert => {}
                }
            }
        }
        if options.date_order != DateOrder::Ymd {
            adapter.set_date_order(options.date_order).await?;
        }
        tracker.advance(JobPhase::TargetPrepared);

        // ===== BULK-IN-PROGRESS =====
        let block_size = options.csv.block_size;
        let chunks = match numeric {
            Some(format) => {
                let numeric_fields = columns
                    .file_columns
                    .iter()
                    .map(|c| c.data_type().map_or(false, |t| t.is_numeric()))
                    .collect();
                rewrite_numeric(
                    input.into_reader(),
                    dialect.clone(),
                    numeric_fields,
                    format,
                    block_size,
                )
            }
            None => input.into_chunks(block_size),
        };

        let bytes = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&bytes);
        let chunks = chunks
            .inspect(move |chunk| {
                if let Ok(chunk) = chunk {
                    counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                }
            })
            .boxed();

        tracker.advance(JobPhase::BulkInProgress);
        let rows = adapter
            .bulk_load(BulkLoad {
                schema: &schema,
                table: &table,
                columns: &columns.file_columns,
                policy: options.merge,
                dialect: &dialect,
                source: CsvSource {
                    path: source_path,
                    chunks,
                },
            })
            .await?;

        // ===== COMPLETE =====
        tracker.advance(JobPhase::Complete);
        let elapsed = started.elapsed();
        info!(
            "Imported {} rows into {}.{} in {:.2?}",
            rows, schema, table, elapsed
        );
        Ok(TransferReport {
            table: format!("{}.{}", schema, table),
            rows,
            bytes: bytes.load(Ordering::Relaxed),
            dialect,
            elapsed,
            phase: JobPhase::Complete,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{DialectImpl, MssqlDialect, PostgresDialect};
    use crate::core::traits::Dialect;

    fn caps_of(dialect: DialectImpl) -> Capabilities {
        dialect.capabilities()
    }

    #[test]
    fn test_upsert_rejected_before_connecting() {
        let mut options = ImportOptions::new("in.csv");
        options.merge = MergePolicy::Upsert;
        let job = ImportJob::new(options);
        let err = job
            .check_capabilities("mssql", &caps_of(DialectImpl::Mssql(MssqlDialect::new())))
            .unwrap_err();
        assert!(matches!(err, TransferError::Unsupported { .. }));
        assert!(job
            .check_capabilities(
                "postgres",
                &caps_of(DialectImpl::Postgres(PostgresDialect::new()))
            )
            .is_ok());
    }

    #[test]
    fn test_stream_source_requires_capability() {
        let job = ImportJob::from_reader(ImportOptions::new("stdin"), std::io::Cursor::new(Vec::new()));
        let err = job
            .check_capabilities("mssql", &caps_of(DialectImpl::Mssql(MssqlDialect::new())))
            .unwrap_err();
        assert!(err.to_string().contains("in-memory stream"));
    }

    #[test]
    fn test_identity_numeric_format_needs_no_rewrite() {
        let mut options = ImportOptions::new("in.csv");
        options.numeric = Some(NumericFormat {
            decimal_separator: '.',
            thousands_separator: None,
        });
        let job = ImportJob::new(options);
        assert!(job.numeric_rewrite().is_none());
        assert!(job
            .check_capabilities("mssql", &caps_of(DialectImpl::Mssql(MssqlDialect::new())))
            .is_ok());

        let mut options = ImportOptions::new("in.csv");
        options.numeric = Some(NumericFormat {
            decimal_separator: ',',
            thousands_separator: Some('.'),
        });
        let job = ImportJob::new(options);
        assert!(job
            .check_capabilities("mssql", &caps_of(DialectImpl::Mssql(MssqlDialect::new())))
            .is_err());
    }

    #[test]
    fn test_truncate_cascade_capability() {
        let mut options = ImportOptions::new("in.csv");
        options.merge = MergePolicy::TruncateCascade;
        let job = ImportJob::new(options);
        assert!(job
            .check_capabilities("mssql", &caps_of(DialectImpl::Mssql(MssqlDialect::new())))
            .is_err());
    }

    #[test]
    fn test_distinct_escape_capability() {
        let mut options = ImportOptions::new("in.csv");
        options.csv.escape = Some('\\');
        let job = ImportJob::new(options);
        let err = job
            .check_capabilities("mssql", &caps_of(DialectImpl::Mssql(MssqlDialect::new())))
            .unwrap_err();
        assert!(err.to_string().contains("distinct escape character"));
        assert!(job
            .check_capabilities(
                "postgres",
                &caps_of(DialectImpl::Postgres(PostgresDialect::new()))
            )
            .is_ok());

        // doubling is always fine
        let mut options = ImportOptions::new("in.csv");
        options.csv.escape = Some('"');
        let job = ImportJob::new(options);
        assert!(job
            .check_capabilities("mssql", &caps_of(DialectImpl::Mssql(MssqlDialect::new())))
            .is_ok());
    }
}
