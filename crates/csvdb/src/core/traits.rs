//! Core traits for database-agnostic CSV transfer.
//!
//! - [`Dialect`]: SQL syntax strategy for one database engine
//! - [`DatabaseAdapter`]: a live connection with introspection, DDL helpers
//!   and the backend's bulk load/unload primitive
//! - [`RowSink`]: receiver for streamed query results
//!
//! # Design Patterns
//!
//! - **Strategy**: `Dialect` provides interchangeable SQL syntax rules
//! - **Template Method**: default `DatabaseAdapter` methods (`execute`,
//!   `table_exists`, `truncate_table`, ...) are built from two primitives,
//!   `execute_statement` and `query_rows`

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tracing::warn;

use crate::config::{ConnectionDescriptor, DateOrder, DbKind, MergePolicy};
use crate::error::{Result, TransferError};
use crate::format::{ChunkStream, CsvDialect, CsvRowSink};

use super::column::Column;
use super::query::SqlParam;

/// How a backend implements `MergePolicy::Upsert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertSupport {
    /// Staging table plus `INSERT ... ON CONFLICT DO UPDATE`.
    Native,
    /// Row replacement: conflicting rows are deleted and re-inserted.
    Replace,
    Unsupported,
}

/// What a backend can do. Checked before connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub upsert: UpsertSupport,
    pub truncate_cascade: bool,
    /// Bulk load from an in-memory stream rather than a server-side path.
    pub stream_source: bool,
    /// Row-by-row rewriting of the byte stream before loading.
    pub row_rewrite: bool,
    /// Date orders other than YMD.
    pub date_orders: bool,
    /// `ALTER COLUMN ... SET DEFAULT` on existing tables.
    pub alter_default: bool,
    /// An escape character other than the quote.
    pub distinct_escape: bool,
}

/// SQL syntax strategy for different database engines.
///
/// # enum dispatch
///
/// Implemented by the per-backend dialect structs and dispatched through the
/// `DialectImpl` enum in the `drivers` module.
pub trait Dialect: Send + Sync {
    /// Dialect identifier (`postgres`, `mysql`, `mssql`).
    fn name(&self) -> &str;

    fn kind(&self) -> DbKind;

    /// Quote an identifier (table name, column name, etc.).
    ///
    /// - PostgreSQL: `"identifier"`
    /// - MySQL: `` `identifier` ``
    /// - MSSQL: `[identifier]`
    fn quote_ident(&self, name: &str) -> Result<String>;

    /// Quote a string literal.
    fn escape_literal(&self, value: &str) -> String {
        super::identifier::escape_literal(value)
    }

    /// `schema.table`, both quoted.
    fn qualify(&self, schema: &str, table: &str) -> Result<String> {
        Ok(format!(
            "{}.{}",
            self.quote_ident(schema)?,
            self.quote_ident(table)?
        ))
    }

    /// Parameter placeholder for the given 1-based index.
    fn param_placeholder(&self, index: usize) -> String;

    /// Fractional-second precision a bare TIMESTAMP gets on this backend.
    fn default_temporal_precision(&self) -> u32;

    /// Type clause for a column, with `(precision[,scale])` and any
    /// auto-sequence substitution.
    fn column_type(&self, column: &Column) -> String;

    /// Clause appended after the type for auto-sequence columns, when the
    /// backend does not use a serial type.
    fn auto_sequence_clause(&self) -> Option<&'static str> {
        None
    }

    fn capabilities(&self) -> Capabilities;

    /// `CREATE SCHEMA` statement for a schema that does not exist yet.
    fn create_schema_sql(&self, schema: &str) -> Result<String> {
        Ok(format!("CREATE SCHEMA {}", self.quote_ident(schema)?))
    }

    fn drop_schema_sql(&self, schema: &str, cascade: bool) -> Result<String> {
        let mut sql = format!("DROP SCHEMA {}", self.quote_ident(schema)?);
        if cascade {
            sql.push_str(" CASCADE");
        }
        Ok(sql)
    }

    fn drop_table_sql(&self, schema: &str, table: &str) -> Result<String> {
        Ok(format!("DROP TABLE IF EXISTS {}", self.qualify(schema, table)?))
    }

    fn truncate_sql(&self, schema: &str, table: &str, cascade: bool) -> Result<String> {
        if cascade && !self.capabilities().truncate_cascade {
            return Err(TransferError::unsupported(self.name(), "TRUNCATE ... CASCADE"));
        }
        let mut sql = format!("TRUNCATE TABLE {}", self.qualify(schema, table)?);
        if cascade {
            sql.push_str(" CASCADE");
        }
        Ok(sql)
    }

    fn set_default_sql(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        expression: &str,
    ) -> Result<String> {
        if !self.capabilities().alter_default {
            return Err(TransferError::unsupported(
                self.name(),
                "ALTER COLUMN ... SET DEFAULT",
            ));
        }
        Ok(format!(
            "ALTER TABLE {} ALTER COLUMN {} SET DEFAULT {}",
            self.qualify(schema, table)?,
            self.quote_ident(column)?,
            expression
        ))
    }

    /// Rewrite `sql` to return at most `limit` rows after skipping `offset`.
    fn paginate(&self, sql: &str, limit: Option<u64>, offset: Option<u64>) -> Result<String>;
}

/// Receives streamed query results.
#[async_trait]
pub trait RowSink: Send {
    /// Called once with the result's column names before any row.
    async fn columns(&mut self, names: &[String]) -> Result<()>;

    /// Called per row; `None` is SQL NULL.
    async fn row(&mut self, values: Vec<Option<String>>) -> Result<()>;
}

/// What `execute` does with a result set.
pub enum ResultMode<'a> {
    /// Run for effect; the outcome carries the affected-row count.
    Discard,
    /// Collect every row.
    Materialize,
    /// Log up to ten rows at warn level if the result is non-empty.
    WarnIfNonEmpty,
    /// Write rows as CSV to `writer`.
    Csv {
        writer: &'a mut (dyn AsyncWrite + Unpin + Send),
        dialect: &'a CsvDialect,
        block_size: usize,
    },
}

/// Result of `execute`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOutcome {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    /// Rows returned, or rows affected for `Discard`.
    pub row_count: u64,
    /// Bytes written for `Csv`.
    pub bytes: u64,
}

/// Number of rows `WarnIfNonEmpty` logs.
const PREVIEW_ROWS: usize = 10;

struct CollectSink {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
    total: u64,
    keep: Option<usize>,
}

#[async_trait]
impl RowSink for CollectSink {
    async fn columns(&mut self, names: &[String]) -> Result<()> {
        self.columns = names.to_vec();
        Ok(())
    }

    async fn row(&mut self, values: Vec<Option<String>>) -> Result<()> {
        self.total += 1;
        if self.keep.map_or(true, |keep| self.rows.len() < keep) {
            self.rows.push(values);
        }
        Ok(())
    }
}

/// Source of a bulk load.
pub struct CsvSource {
    /// Path of the file on disk, when the data comes from one. Required by
    /// backends that load from a server-visible path.
    pub path: Option<PathBuf>,
    /// File bytes (BOM removed), header row included when the dialect says so.
    pub chunks: ChunkStream,
}

/// One bulk load request.
pub struct BulkLoad<'a> {
    pub schema: &'a str,
    pub table: &'a str,
    /// File columns in file order; slugs are the target column names.
    pub columns: &'a [Column],
    pub policy: MergePolicy,
    pub dialect: &'a CsvDialect,
    pub source: CsvSource,
}

/// One bulk unload request.
pub struct BulkUnload<'a> {
    pub schema: &'a str,
    pub table: &'a str,
    /// Columns to export in order; slugs are the source column names.
    pub columns: &'a [Column],
    /// Raw SQL predicate, passed through unchanged.
    pub where_clause: Option<&'a str>,
    pub dialect: &'a CsvDialect,
    pub block_size: usize,
}

/// Rows and bytes moved by an unload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnloadSummary {
    pub rows: u64,
    pub bytes: u64,
}

/// A live connection to one backend.
///
/// One adapter serves one job. Methods take `&mut self`: a job is a single
/// sequential task and the connection is never shared.
#[async_trait]
pub trait DatabaseAdapter: Send {
    fn descriptor(&self) -> &ConnectionDescriptor;

    fn dialect(&self) -> &dyn Dialect;

    // ===== Primitives =====

    /// Run a statement and return the affected-row count.
    async fn execute_statement(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64>;

    /// Run a query and stream its rows into `sink`.
    async fn query_rows(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        sink: &mut dyn RowSink,
    ) -> Result<()>;

    /// Columns of `schema.table`, or `None` when the table does not exist.
    async fn get_table_columns(&mut self, schema: &str, table: &str)
        -> Result<Option<Vec<Column>>>;

    /// Load CSV data into a table and return the number of rows loaded.
    async fn bulk_load(&mut self, request: BulkLoad<'_>) -> Result<u64>;

    /// Write a table's rows as CSV to `out`.
    async fn bulk_unload(
        &mut self,
        request: BulkUnload<'_>,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<UnloadSummary>;

    /// Apply a date order to subsequent loads on this connection.
    async fn set_date_order(&mut self, order: DateOrder) -> Result<()>;

    /// Release the connection. Calling it again is a no-op.
    async fn close(&mut self) -> Result<()>;

    // ===== Template methods =====

    /// Run `sql` and handle the result according to `mode`.
    async fn execute(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        mode: ResultMode<'_>,
    ) -> Result<QueryOutcome> {
        match mode {
            ResultMode::Discard => {
                let affected = self.execute_statement(sql, params).await?;
                Ok(QueryOutcome {
                    row_count: affected,
                    ..QueryOutcome::default()
                })
            }
            ResultMode::Materialize => {
                let mut sink = CollectSink {
                    columns: Vec::new(),
                    rows: Vec::new(),
                    total: 0,
                    keep: None,
                };
                self.query_rows(sql, params, &mut sink).await?;
                Ok(QueryOutcome {
                    columns: sink.columns,
                    rows: sink.rows,
                    row_count: sink.total,
                    bytes: 0,
                })
            }
            ResultMode::WarnIfNonEmpty => {
                let mut sink = CollectSink {
                    columns: Vec::new(),
                    rows: Vec::new(),
                    total: 0,
                    keep: Some(PREVIEW_ROWS),
                };
                self.query_rows(sql, params, &mut sink).await?;
                if sink.total > 0 {
                    warn!(
                        "Query returned {} row(s): {}\n{}",
                        sink.total,
                        sql,
                        render_preview(&sink.columns, &sink.rows)
                    );
                }
                Ok(QueryOutcome {
                    columns: sink.columns,
                    rows: sink.rows,
                    row_count: sink.total,
                    bytes: 0,
                })
            }
            ResultMode::Csv {
                writer,
                dialect,
                block_size,
            } => {
                let mut sink = CsvRowSink::new(writer, dialect, block_size);
                self.query_rows(sql, params, &mut sink).await?;
                let columns = sink.column_names().to_vec();
                let summary = sink.finish().await?;
                Ok(QueryOutcome {
                    columns,
                    rows: Vec::new(),
                    row_count: summary.rows,
                    bytes: summary.bytes,
                })
            }
        }
    }

    /// First column of the single row `sql` returns.
    async fn query_scalar(&mut self, sql: &str, params: &[SqlParam]) -> Result<Option<String>> {
        let row = self.query_one(sql, params).await?;
        Ok(row.into_iter().next().flatten())
    }

    /// The single row `sql` returns; zero or several rows are errors.
    async fn query_one(&mut self, sql: &str, params: &[SqlParam]) -> Result<Vec<Option<String>>> {
        let mut sink = CollectSink {
            columns: Vec::new(),
            rows: Vec::new(),
            total: 0,
            keep: Some(1),
        };
        self.query_rows(sql, params, &mut sink).await?;
        match sink.total {
            0 => Err(TransferError::NotFound(sql.to_string())),
            1 => Ok(sink.rows.into_iter().next().unwrap_or_default()),
            n => Err(TransferError::MultipleFound {
                query: sql.to_string(),
                count: n as usize,
            }),
        }
    }

    async fn schema_exists(&mut self, schema: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name = {}",
            self.dialect().param_placeholder(1)
        );
        let count = self.query_scalar(&sql, &[schema.into()]).await?;
        Ok(count.as_deref().unwrap_or("0") != "0")
    }

    async fn table_exists(&mut self, schema: &str, table: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) FROM information_schema.tables \
             WHERE table_schema = {} AND table_name = {}",
            self.dialect().param_placeholder(1),
            self.dialect().param_placeholder(2)
        );
        let count = self
            .query_scalar(&sql, &[schema.into(), table.into()])
            .await?;
        Ok(count.as_deref().unwrap_or("0") != "0")
    }

    async fn create_schema(&mut self, schema: &str) -> Result<()> {
        let sql = self.dialect().create_schema_sql(schema)?;
        self.execute_statement(&sql, &[]).await?;
        Ok(())
    }

    async fn drop_schema(&mut self, schema: &str, cascade: bool) -> Result<()> {
        let sql = self.dialect().drop_schema_sql(schema, cascade)?;
        self.execute_statement(&sql, &[]).await?;
        Ok(())
    }

    async fn drop_table(&mut self, schema: &str, table: &str) -> Result<()> {
        let sql = self.dialect().drop_table_sql(schema, table)?;
        self.execute_statement(&sql, &[]).await?;
        Ok(())
    }

    async fn truncate_table(&mut self, schema: &str, table: &str, cascade: bool) -> Result<()> {
        let sql = self.dialect().truncate_sql(schema, table, cascade)?;
        self.execute_statement(&sql, &[]).await?;
        Ok(())
    }

    async fn set_column_default(
        &mut self,
        schema: &str,
        table: &str,
        column: &str,
        expression: &str,
    ) -> Result<()> {
        let sql = self
            .dialect()
            .set_default_sql(schema, table, column, expression)?;
        self.execute_statement(&sql, &[]).await?;
        Ok(())
    }
}

fn render_preview(columns: &[String], rows: &[Vec<Option<String>>]) -> String {
    let mut out = columns.join(" | ");
    for row in rows {
        out.push('\n');
        let cells: Vec<&str> = row
            .iter()
            .map(|v| v.as_deref().unwrap_or("NULL"))
            .collect();
        out.push_str(&cells.join(" | "));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_preview() {
        let rows = vec![
            vec![Some("1".to_string()), None],
            vec![Some("2".to_string()), Some("x".to_string())],
        ];
        let text = render_preview(&["id".to_string(), "v".to_string()], &rows);
        assert_eq!(text, "id | v\n1 | NULL\n2 | x");
    }

    #[tokio::test]
    async fn test_collect_sink_keeps_limit_but_counts_all() {
        let mut sink = CollectSink {
            columns: Vec::new(),
            rows: Vec::new(),
            total: 0,
            keep: Some(PREVIEW_ROWS),
        };
        sink.columns(&["a".to_string()]).await.unwrap();
        for i in 0..25 {
            sink.row(vec![Some(i.to_string())]).await.unwrap();
        }
        assert_eq!(sink.total, 25);
        assert_eq!(sink.rows.len(), PREVIEW_ROWS);
    }
}
