//! SQL Server adapter: `BULK INSERT` from a server-visible file path.

use std::path::Path;

use async_trait::async_trait;
use futures::TryStreamExt;
use tiberius::{AuthMethod, Client, ColumnData, Config, FromSql, Query};
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::config::{ConnectionDescriptor, DateOrder, DbKind, MergePolicy};
use crate::core::column::Column;
use crate::core::query::SqlParam;
use crate::core::traits::{
    BulkLoad, BulkUnload, DatabaseAdapter, Dialect, RowSink, UnloadSummary,
};
use crate::drivers::common::{unique_suffix, TlsBuilder};
use crate::error::{Result, TransferError};
use crate::format::{backend_encoding, CsvDialect, CsvRowSink};

use super::dialect::MssqlDialect;
use super::introspect::load_columns;

type TdsClient = Client<Compat<TcpStream>>;

/// A single SQL Server connection serving one job.
pub struct MssqlAdapter {
    descriptor: ConnectionDescriptor,
    dialect: MssqlDialect,
    client: Option<TdsClient>,
}

impl MssqlAdapter {
    /// Connect using the descriptor's host, SQL Server credentials and `sslmode`.
    pub async fn connect(descriptor: ConnectionDescriptor) -> Result<Self> {
        let mut config = Config::new();
        config.host(descriptor.host());
        config.port(descriptor.port());
        config.database(descriptor.database());
        config.authentication(AuthMethod::sql_server(
            descriptor.user(),
            descriptor.password(),
        ));

        let (encryption, trust) = TlsBuilder::new(descriptor.ssl_mode()).mssql_encryption();
        config.encryption(encryption);
        if trust {
            warn!("sslmode=require: the SQL Server certificate is not verified");
            config.trust_cert();
        }

        let context = format!("connecting to {}", descriptor.redacted());
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| TransferError::connection(e, context.clone()))?;
        tcp.set_nodelay(true)?;
        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| TransferError::connection(e, context))?;

        info!(
            "Connected to SQL Server: {}:{}/{}",
            descriptor.host(),
            descriptor.port(),
            descriptor.database()
        );
        Ok(Self::from_client(client, descriptor))
    }

    /// Wrap an already-open client.
    pub fn from_client(client: TdsClient, descriptor: ConnectionDescriptor) -> Self {
        Self {
            descriptor,
            dialect: MssqlDialect::new(),
            client: Some(client),
        }
    }

    fn client(&mut self) -> Result<&mut TdsClient> {
        let context = self.descriptor.redacted();
        self.client
            .as_mut()
            .ok_or_else(|| TransferError::connection("connection is closed", context))
    }

    /// BULK INSERT maps file fields to every column of the target in order.
    /// When the file carries a different column list, load through a view
    /// selecting exactly those columns.
    async fn load_target(
        &mut self,
        schema: &str,
        table: &str,
        columns: &[&str],
    ) -> Result<Option<String>> {
        if columns.is_empty() {
            return Ok(None);
        }
        let precision = self.dialect.default_temporal_precision();
        let table_columns = load_columns(self.client()?, schema, table, precision)
            .await?
            .ok_or_else(|| {
                TransferError::NotFound(format!("table {}.{}", schema, table))
            })?;
        let full: Vec<&str> = table_columns.iter().map(Column::slug).collect();
        if full == columns {
            return Ok(None);
        }

        let view = format!("_load_{}_{}", table, unique_suffix());
        let select = columns
            .iter()
            .map(|c| self.dialect.quote_ident(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        let sql = format!(
            "CREATE VIEW {} AS SELECT {} FROM {}",
            self.dialect.qualify(schema, &view)?,
            select,
            self.dialect.qualify(schema, table)?
        );
        self.execute_statement(&sql, &[]).await?;
        debug!("Created load view {}", view);
        Ok(Some(view))
    }
}

fn bind_params<'a>(query: &mut Query<'a>, params: &'a [SqlParam]) {
    for param in params {
        match param {
            SqlParam::Null => query.bind(Option::<&str>::None),
            SqlParam::Bool(v) => query.bind(*v),
            SqlParam::Int(v) => query.bind(*v),
            SqlParam::Float(v) => query.bind(*v),
            SqlParam::Text(v) => query.bind(v.as_str()),
        }
    }
}

/// Render one result cell as text.
fn cell_text(data: &ColumnData<'static>) -> Result<Option<String>> {
    fn text<T: ToString>(v: Option<T>) -> Option<String> {
        v.map(|v| v.to_string())
    }

    Ok(match data {
        ColumnData::U8(v) => text(*v),
        ColumnData::I16(v) => text(*v),
        ColumnData::I32(v) => text(*v),
        ColumnData::I64(v) => text(*v),
        ColumnData::F32(v) => text(*v),
        ColumnData::F64(v) => text(*v),
        ColumnData::Bit(v) => v.map(|b| if b { "1" } else { "0" }.to_string()),
        ColumnData::String(v) => v.as_ref().map(|s| s.to_string()),
        ColumnData::Guid(v) => text(v.as_ref()),
        ColumnData::Numeric(v) => text(v.as_ref()),
        ColumnData::Binary(v) => v
            .as_ref()
            .map(|bytes| bytes.iter().map(|b| format!("{:02X}", b)).collect()),
        ColumnData::Xml(v) => v.as_ref().map(|xml| (**xml).clone().into_string()),
        ColumnData::Date(_) => text(chrono::NaiveDate::from_sql(data)?),
        ColumnData::Time(_) => text(chrono::NaiveTime::from_sql(data)?),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            text(chrono::NaiveDateTime::from_sql(data)?)
        }
        ColumnData::DateTimeOffset(_) => {
            text(chrono::DateTime::<chrono::FixedOffset>::from_sql(data)?)
        }
    })
}

/// `BULK INSERT` statement for one load. BULK INSERT only knows doubled
/// quotes, so any other escape is refused.
fn bulk_insert_sql(
    dialect: &MssqlDialect,
    target: &str,
    file: &Path,
    codepage: &str,
    csv: &CsvDialect,
) -> Result<String> {
    if !csv.doublequote() {
        return Err(TransferError::unsupported("mssql", "distinct escape character"));
    }
    let mut options = vec![
        format!("CODEPAGE = {}", dialect.escape_literal(codepage)),
        format!(
            "FIELDTERMINATOR = {}",
            dialect.escape_literal(&csv.delimiter_char().to_string())
        ),
        format!(
            "FIELDQUOTE = {}",
            dialect.escape_literal(&csv.quote_char().to_string())
        ),
        "FORMAT = 'CSV'".to_string(),
    ];
    if !csv.crlf {
        options.push("ROWTERMINATOR = '0x0a'".to_string());
    }
    if csv.header {
        options.push("FIRSTROW = 2".to_string());
    }
    if csv.null.is_empty() {
        options.push("KEEPNULLS".to_string());
    }
    Ok(format!(
        "BULK INSERT {} FROM {} WITH ({})",
        target,
        dialect.escape_literal(&file.display().to_string()),
        options.join(", ")
    ))
}

#[async_trait]
impl DatabaseAdapter for MssqlAdapter {
    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn execute_statement(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        let mut query = Query::new(sql);
        bind_params(&mut query, params);
        let result = query.execute(self.client()?).await?;
        Ok(result.total())
    }

    async fn query_rows(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        sink: &mut dyn RowSink,
    ) -> Result<()> {
        let mut query = Query::new(sql);
        bind_params(&mut query, params);
        let mut stream = query.query(self.client()?).await?;

        let names: Vec<String> = stream
            .columns()
            .await?
            .map(|columns| columns.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        sink.columns(&names).await?;

        let mut rows = stream.into_row_stream();
        while let Some(row) = rows.try_next().await? {
            let cells = row
                .into_iter()
                .map(|data| cell_text(&data))
                .collect::<Result<Vec<_>>>()?;
            sink.row(cells).await?;
        }
        Ok(())
    }

    async fn get_table_columns(
        &mut self,
        schema: &str,
        table: &str,
    ) -> Result<Option<Vec<Column>>> {
        let precision = self.dialect.default_temporal_precision();
        load_columns(self.client()?, schema, table, precision).await
    }

    async fn bulk_load(&mut self, request: BulkLoad<'_>) -> Result<u64> {
        if request.policy == MergePolicy::Upsert {
            return Err(TransferError::unsupported("mssql", "upsert"));
        }
        let Some(path) = request.source.path.as_deref() else {
            return Err(TransferError::unsupported(
                "mssql",
                "bulk load from an in-memory stream (BULK INSERT reads a file path)",
            ));
        };
        let path = tokio::fs::canonicalize(path).await?;
        let codepage = backend_encoding(DbKind::Mssql, request.dialect.encoding)?;

        let columns: Vec<&str> = request.columns.iter().map(Column::slug).collect();
        let view = self
            .load_target(request.schema, request.table, &columns)
            .await?;
        let target = self
            .dialect
            .qualify(request.schema, view.as_deref().unwrap_or(request.table))?;

        let result = match bulk_insert_sql(&self.dialect, &target, &path, &codepage, request.dialect)
        {
            Ok(sql) => {
                debug!("BULK INSERT: {}", sql);
                self.execute_statement(&sql, &[]).await
            }
            Err(e) => Err(e),
        };

        if let Some(view) = view {
            let drop = format!("DROP VIEW {}", self.dialect.qualify(request.schema, &view)?);
            if let Err(e) = self.execute_statement(&drop, &[]).await {
                warn!("Failed to drop load view {}: {}", view, e);
            }
        }

        let rows = result?;
        info!("Loaded {} rows into {}.{}", rows, request.schema, request.table);
        Ok(rows)
    }

    async fn bulk_unload(
        &mut self,
        request: BulkUnload<'_>,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<UnloadSummary> {
        let target = self.dialect.qualify(request.schema, request.table)?;
        let select_list = if request.columns.is_empty() {
            "*".to_string()
        } else {
            request
                .columns
                .iter()
                .map(|c| self.dialect.quote_ident(c.slug()))
                .collect::<Result<Vec<_>>>()?
                .join(", ")
        };
        let mut sql = format!("SELECT {} FROM {}", select_list, target);
        if let Some(predicate) = request.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(predicate);
        }
        debug!("Unload query: {}", sql);

        let mut sink = CsvRowSink::new(out, request.dialect, request.block_size);
        self.query_rows(&sql, &[], &mut sink).await?;
        let summary = sink.finish().await?;
        info!(
            "Unloaded {} rows ({} bytes) from {}",
            summary.rows, summary.bytes, target
        );
        Ok(summary)
    }

    async fn set_date_order(&mut self, order: DateOrder) -> Result<()> {
        let sql = format!("SET DATEFORMAT {}", order.as_str().to_lowercase());
        self.execute_statement(&sql, &[]).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.close().await?;
            debug!("Closed SQL Server connection {}", self.descriptor.redacted());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_insert_sql() {
        let dialect = MssqlDialect::new();
        let csv = CsvDialect {
            delimiter: b';',
            crlf: false,
            ..CsvDialect::default()
        };
        let sql = bulk_insert_sql(
            &dialect,
            "[dbo].[people]",
            Path::new("/data/people.csv"),
            "65001",
            &csv,
        )
        .unwrap();
        assert_eq!(
            sql,
            "BULK INSERT [dbo].[people] FROM '/data/people.csv' WITH (CODEPAGE = '65001', \
             FIELDTERMINATOR = ';', FIELDQUOTE = '\"', FORMAT = 'CSV', \
             ROWTERMINATOR = '0x0a', FIRSTROW = 2, KEEPNULLS)"
        );
    }

    #[test]
    fn test_bulk_insert_sql_without_header() {
        let dialect = MssqlDialect::new();
        let csv = CsvDialect {
            header: false,
            crlf: true,
            null: "NULL".to_string(),
            ..CsvDialect::default()
        };
        let sql = bulk_insert_sql(&dialect, "[t]", Path::new("/a.csv"), "1252", &csv).unwrap();
        assert!(!sql.contains("FIRSTROW"));
        assert!(!sql.contains("KEEPNULLS"));
        assert!(!sql.contains("ROWTERMINATOR"));
    }

    #[test]
    fn test_bulk_insert_refuses_backslash_escape() {
        let dialect = MssqlDialect::new();
        let csv = CsvDialect {
            escape: b'\\',
            ..CsvDialect::default()
        };
        let err = bulk_insert_sql(&dialect, "[t]", Path::new("/a.csv"), "65001", &csv).unwrap_err();
        match err {
            TransferError::Unsupported { backend, feature } => {
                assert_eq!(backend, "mssql");
                assert!(feature.contains("escape"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&ColumnData::I32(Some(7))).unwrap().as_deref(), Some("7"));
        assert_eq!(cell_text(&ColumnData::I32(None)).unwrap(), None);
        assert_eq!(cell_text(&ColumnData::Bit(Some(true))).unwrap().as_deref(), Some("1"));
        assert_eq!(
            cell_text(&ColumnData::String(Some("x".into()))).unwrap().as_deref(),
            Some("x")
        );
        assert_eq!(
            cell_text(&ColumnData::Binary(Some(vec![0xAB, 0x01].into())))
                .unwrap()
                .as_deref(),
            Some("AB01")
        );
    }

    #[tokio::test]
    async fn test_unsupported_upsert_fails_before_io() {
        let descriptor = ConnectionDescriptor::new(DbKind::Mssql, "localhost", "db");
        let mut adapter = MssqlAdapter {
            descriptor,
            dialect: MssqlDialect::new(),
            client: None,
        };
        let csv = CsvDialect::default();
        let err = adapter
            .bulk_load(BulkLoad {
                schema: "dbo",
                table: "t",
                columns: &[],
                policy: MergePolicy::Upsert,
                dialect: &csv,
                source: crate::core::traits::CsvSource {
                    path: None,
                    chunks: Box::pin(futures::stream::empty()),
                },
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Unsupported { .. }));
    }
}
