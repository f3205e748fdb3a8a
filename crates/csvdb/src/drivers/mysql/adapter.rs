//! MySQL adapter: `LOAD DATA LOCAL INFILE` fed from the chunk stream.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use mysql_async::prelude::*;
use mysql_async::{BinaryProtocol, Conn, OptsBuilder, Params, QueryResult, SslOpts, Value};
use tokio::io::AsyncWrite;
use tracing::{debug, info, warn};

use crate::config::{ConnectionDescriptor, DateOrder, DbKind, MergePolicy, SslMode};
use crate::core::column::Column;
use crate::core::query::SqlParam;
use crate::core::traits::{
    BulkLoad, BulkUnload, DatabaseAdapter, Dialect, RowSink, UnloadSummary,
};
use crate::error::{Result, TransferError};
use crate::format::{backend_encoding, CsvDialect, CsvRowSink};

use super::dialect::MysqlDialect;
use super::introspect::load_columns;

/// A single MySQL connection serving one job.
pub struct MysqlAdapter {
    descriptor: ConnectionDescriptor,
    dialect: MysqlDialect,
    conn: Option<Conn>,
}

impl MysqlAdapter {
    /// Connect using the descriptor's host, credentials and `sslmode`.
    pub async fn connect(descriptor: ConnectionDescriptor) -> Result<Self> {
        let ssl_opts = match descriptor.ssl_mode() {
            SslMode::Disable => {
                warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
                None
            }
            SslMode::Require => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
            SslMode::VerifyCa => Some(SslOpts::default().with_danger_skip_domain_validation(true)),
            SslMode::VerifyFull => Some(SslOpts::default()),
        };

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(descriptor.host())
            .tcp_port(descriptor.port())
            .db_name(Some(descriptor.database()))
            .user(Some(descriptor.user()).filter(|u| !u.is_empty()))
            .pass(Some(descriptor.password()).filter(|p| !p.is_empty()));
        if let Some(ssl) = ssl_opts {
            builder = builder.ssl_opts(ssl);
        }

        let conn = Conn::new(builder).await.map_err(|e| {
            TransferError::connection(e, format!("connecting to {}", descriptor.redacted()))
        })?;

        info!(
            "Connected to MySQL: {}:{}/{}",
            descriptor.host(),
            descriptor.port(),
            descriptor.database()
        );

        Ok(Self::from_conn(conn, descriptor))
    }

    /// Wrap an already-open connection.
    pub fn from_conn(conn: Conn, descriptor: ConnectionDescriptor) -> Self {
        Self {
            descriptor,
            dialect: MysqlDialect::new(),
            conn: Some(conn),
        }
    }

    fn conn(&mut self) -> Result<&mut Conn> {
        let context = self.descriptor.redacted();
        self.conn
            .as_mut()
            .ok_or_else(|| TransferError::connection("connection is closed", context))
    }
}

fn to_value(param: &SqlParam) -> Value {
    match param {
        SqlParam::Null => Value::NULL,
        SqlParam::Bool(v) => Value::Int(i64::from(*v)),
        SqlParam::Int(v) => Value::Int(*v),
        SqlParam::Float(v) => Value::Double(*v),
        SqlParam::Text(v) => Value::Bytes(v.clone().into_bytes()),
    }
}

fn to_params(params: &[SqlParam]) -> Params {
    if params.is_empty() {
        Params::Empty
    } else {
        Params::Positional(params.iter().map(to_value).collect())
    }
}

/// Render one result value as text.
fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::NULL => None,
        Value::Bytes(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Int(v) => Some(v.to_string()),
        Value::UInt(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Double(v) => Some(v.to_string()),
        Value::Date(y, mo, d, h, mi, s, us) => Some(if (*h, *mi, *s, *us) == (0, 0, 0, 0) {
            format!("{:04}-{:02}-{:02}", y, mo, d)
        } else if *us == 0 {
            format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, mo, d, h, mi, s)
        } else {
            format!(
                "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
                y, mo, d, h, mi, s, us
            )
        }),
        Value::Time(negative, days, h, mi, s, us) => {
            let hours = u64::from(*days) * 24 + u64::from(*h);
            let sign = if *negative { "-" } else { "" };
            Some(if *us == 0 {
                format!("{}{:02}:{:02}:{:02}", sign, hours, mi, s)
            } else {
                format!("{}{:02}:{:02}:{:02}.{:06}", sign, hours, mi, s, us)
            })
        }
    }
}

async fn drain_rows(
    mut result: QueryResult<'_, 'static, BinaryProtocol>,
    sink: &mut dyn RowSink,
) -> Result<()> {
    let names: Vec<String> = result
        .columns_ref()
        .iter()
        .map(|c| c.name_str().into_owned())
        .collect();
    sink.columns(&names).await?;
    while let Some(row) = result.next().await? {
        let cells = (0..row.len())
            .map(|i| row.as_ref(i).and_then(value_text))
            .collect();
        sink.row(cells).await?;
    }
    Ok(())
}

/// `LOAD DATA LOCAL INFILE` statement for one load.
fn load_data_sql(
    dialect: &MysqlDialect,
    file: &str,
    target: &str,
    charset: &str,
    csv: &CsvDialect,
    replace: bool,
    columns: &[&str],
) -> Result<String> {
    let mut sql = format!("LOAD DATA LOCAL INFILE {}", dialect.escape_literal(file));
    if replace {
        sql.push_str(" REPLACE");
    }
    sql.push_str(&format!(
        " INTO TABLE {} CHARACTER SET {} FIELDS TERMINATED BY {} ENCLOSED BY {} ESCAPED BY {}",
        target,
        charset,
        dialect.escape_literal(&csv.delimiter_char().to_string()),
        dialect.escape_literal(&csv.quote_char().to_string()),
        dialect.escape_literal(&csv.escape_char().to_string()),
    ));
    if csv.header {
        sql.push_str(" IGNORE 1 LINES");
    }
    if !columns.is_empty() {
        let quoted = columns
            .iter()
            .map(|c| dialect.quote_ident(c))
            .collect::<Result<Vec<_>>>()?;
        sql.push_str(&format!(" ({})", quoted.join(", ")));
    }
    Ok(sql)
}

#[async_trait]
impl DatabaseAdapter for MysqlAdapter {
    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn execute_statement(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        let conn = self.conn()?;
        if params.is_empty() {
            conn.query_drop(sql).await?;
        } else {
            conn.exec_drop(sql, to_params(params)).await?;
        }
        Ok(conn.affected_rows())
    }

    async fn query_rows(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        sink: &mut dyn RowSink,
    ) -> Result<()> {
        let conn = self.conn()?;
        let result = conn.exec_iter(sql, to_params(params)).await?;
        drain_rows(result, sink).await
    }

    async fn get_table_columns(
        &mut self,
        schema: &str,
        table: &str,
    ) -> Result<Option<Vec<Column>>> {
        let precision = self.dialect.default_temporal_precision();
        load_columns(self.conn()?, schema, table, precision).await
    }

    async fn bulk_load(&mut self, request: BulkLoad<'_>) -> Result<u64> {
        let charset = backend_encoding(DbKind::Mysql, request.dialect.encoding)?;
        let target = self.dialect.qualify(request.schema, request.table)?;
        let replace = request.policy == MergePolicy::Upsert;
        if replace {
            warn!(
                "MySQL upsert uses REPLACE: conflicting rows are deleted and re-inserted, \
                 columns missing from the file fall back to their defaults"
            );
        }

        let file = request
            .source
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stream".to_string());
        let columns: Vec<&str> = request.columns.iter().map(Column::slug).collect();
        let sql = load_data_sql(
            &self.dialect,
            &file,
            &target,
            &charset,
            request.dialect,
            replace,
            &columns,
        )?;
        debug!("LOAD DATA: {}", sql);

        // the handler future must be Sync; the stream is handed over through a mutex
        let slot = Mutex::new(Some(request.source.chunks));
        let conn = self.conn()?;
        conn.set_infile_handler(async move {
            let stream = slot
                .lock()
                .ok()
                .and_then(|mut chunks| chunks.take())
                .unwrap_or_else(|| futures::stream::empty().boxed());
            Ok(stream)
        });
        conn.query_drop(sql.as_str()).await?;

        let rows = conn.affected_rows();
        info!("Loaded {} rows into {}", rows, target);
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
        match order {
            DateOrder::Ymd => Ok(()),
            other => Err(TransferError::unsupported(
                "mysql",
                format!("date order {}", other),
            )),
        }
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.disconnect().await?;
            debug!("Closed MySQL connection {}", self.descriptor.redacted());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_data_sql() {
        let dialect = MysqlDialect::new();
        let csv = CsvDialect {
            delimiter: b';',
            ..CsvDialect::default()
        };
        let sql = load_data_sql(
            &dialect,
            "/tmp/people.csv",
            "`db`.`people`",
            "utf8mb4",
            &csv,
            false,
            &["id", "name"],
        )
        .unwrap();
        assert_eq!(
            sql,
            "LOAD DATA LOCAL INFILE '/tmp/people.csv' INTO TABLE `db`.`people` \
             CHARACTER SET utf8mb4 FIELDS TERMINATED BY ';' ENCLOSED BY '\"' ESCAPED BY '\"' \
             IGNORE 1 LINES (`id`, `name`)"
        );
    }

    #[test]
    fn test_load_data_sql_replace_without_header() {
        let dialect = MysqlDialect::new();
        let csv = CsvDialect {
            header: false,
            escape: b'\\',
            ..CsvDialect::default()
        };
        let sql = load_data_sql(&dialect, "C:\\data\\a.csv", "`t`", "latin1", &csv, true, &[])
            .unwrap();
        assert!(sql.starts_with("LOAD DATA LOCAL INFILE 'C:\\\\data\\\\a.csv' REPLACE INTO TABLE `t`"));
        assert!(sql.ends_with("ESCAPED BY '\\\\'"));
    }

    #[test]
    fn test_value_text() {
        assert_eq!(value_text(&Value::NULL), None);
        assert_eq!(value_text(&Value::Int(-4)).as_deref(), Some("-4"));
        assert_eq!(
            value_text(&Value::Date(2024, 3, 9, 0, 0, 0, 0)).as_deref(),
            Some("2024-03-09")
        );
        assert_eq!(
            value_text(&Value::Date(2024, 3, 9, 13, 5, 7, 120)).as_deref(),
            Some("2024-03-09 13:05:07.000120")
        );
        assert_eq!(
            value_text(&Value::Time(true, 1, 2, 3, 4, 0)).as_deref(),
            Some("-26:03:04")
        );
    }

    #[test]
    fn test_to_params() {
        assert!(matches!(to_params(&[]), Params::Empty));
        match to_params(&[SqlParam::Bool(true), SqlParam::from("x")]) {
            Params::Positional(values) => {
                assert_eq!(values, vec![Value::Int(1), Value::Bytes(b"x".to_vec())]);
            }
            _ => panic!("expected positional params"),
        }
    }
}
