//! PostgreSQL adapter: COPY-based bulk load/unload and staging-table upsert.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, info, warn};

use crate::config::{ConnectionDescriptor, DateOrder, DbKind, MergePolicy};
use crate::core::column::Column;
use crate::core::identifier::escape_literal;
use crate::core::query::SqlParam;
use crate::core::traits::{
    BulkLoad, BulkUnload, DatabaseAdapter, Dialect, RowSink, UnloadSummary,
};
use crate::drivers::common::{unique_suffix, TlsBuilder};
use crate::error::{Result, TransferError};
use crate::format::{backend_encoding, ChunkStream, CsvDialect, RecordCounter};

use super::dialect::PostgresDialect;
use super::introspect::load_columns;

/// A single PostgreSQL connection serving one job.
pub struct PostgresAdapter {
    descriptor: ConnectionDescriptor,
    dialect: PostgresDialect,
    client: Option<Client>,
    connection_task: Option<JoinHandle<()>>,
}

impl PostgresAdapter {
    /// Connect using the descriptor's host, credentials and `sslmode`.
    pub async fn connect(descriptor: ConnectionDescriptor) -> Result<Self> {
        let mut config = tokio_postgres::Config::new();
        config
            .host(descriptor.host())
            .port(descriptor.port())
            .dbname(descriptor.database())
            .application_name("csvdb");
        if !descriptor.user().is_empty() {
            config.user(descriptor.user());
        }
        if !descriptor.password().is_empty() {
            config.password(descriptor.password());
        }

        let context = format!("connecting to {}", descriptor.redacted());
        let (client, connection_task) = match TlsBuilder::new(descriptor.ssl_mode())
            .postgres_connector()?
        {
            Some(tls) => {
                let (client, connection) = config
                    .connect(tls)
                    .await
                    .map_err(|e| TransferError::connection(e, context.clone()))?;
                let task = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection error: {}", e);
                    }
                });
                (client, task)
            }
            None => {
                warn!("PostgreSQL TLS is disabled. Credentials will be transmitted in plaintext.");
                let (client, connection) = config
                    .connect(NoTls)
                    .await
                    .map_err(|e| TransferError::connection(e, context.clone()))?;
                let task = tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        warn!("PostgreSQL connection error: {}", e);
                    }
                });
                (client, task)
            }
        };

        info!(
            "Connected to PostgreSQL: {}:{}/{}",
            descriptor.host(),
            descriptor.port(),
            descriptor.database()
        );

        Ok(Self {
            descriptor,
            dialect: PostgresDialect::new(),
            client: Some(client),
            connection_task: Some(connection_task),
        })
    }

    /// Wrap an already-open client. The caller keeps driving its connection.
    pub fn from_client(client: Client, descriptor: ConnectionDescriptor) -> Self {
        Self {
            descriptor,
            dialect: PostgresDialect::new(),
            client: Some(client),
            connection_task: None,
        }
    }

    fn client(&self) -> Result<&Client> {
        self.client.as_ref().ok_or_else(|| {
            TransferError::connection("connection is closed", self.descriptor.redacted())
        })
    }

    async fn copy_in(&self, sql: &str, mut chunks: ChunkStream) -> Result<u64> {
        debug!("COPY: {}", sql);
        let sink = self.client()?.copy_in::<_, Bytes>(sql).await?;
        tokio::pin!(sink);
        while let Some(chunk) = chunks.next().await {
            sink.send(chunk?).await?;
        }
        Ok(sink.finish().await?)
    }

    async fn upsert(&mut self, request: BulkLoad<'_>, encoding: &str) -> Result<u64> {
        let header = header_option(&request);
        let BulkLoad {
            schema,
            table,
            columns,
            dialect: csv,
            source,
            ..
        } = request;

        let target = self.dialect.qualify(schema, table)?;
        let table_columns = load_columns(
            self.client()?,
            schema,
            table,
            self.dialect.default_temporal_precision(),
        )
        .await?
        .ok_or_else(|| TransferError::NotFound(format!("table {}", target)))?;

        let pk: Vec<&str> = table_columns
            .iter()
            .filter(|c| c.primary_key())
            .map(Column::slug)
            .collect();
        if pk.is_empty() {
            return Err(TransferError::NoPrimaryKey(target));
        }

        let loaded: Vec<&str> = if columns.is_empty() {
            table_columns.iter().map(Column::slug).collect()
        } else {
            columns.iter().map(Column::slug).collect()
        };
        if let Some(missing) = pk.iter().find(|k| !loaded.contains(k)) {
            return Err(TransferError::reconcile(format!(
                "upsert into {} requires primary key column {} in the file",
                target, missing
            )));
        }

        let staging = format!("_staging_{}_{}", table, unique_suffix());
        let options = copy_options(csv, encoding, header);
        let plan = StagedUpsert::new(&self.dialect, &target, &staging, &loaded, &pk, &options)?;
        let affected = plan.run(self, source.chunks).await?;
        info!("Upserted {} rows into {}", affected, target);
        Ok(affected)
    }
}

/// What a staged upsert needs from a connection.
#[async_trait]
trait StagingConnection: Send {
    async fn exec(&mut self, sql: &str) -> Result<u64>;
    async fn copy_in_chunks(&mut self, sql: &str, chunks: ChunkStream) -> Result<u64>;
}

#[async_trait]
impl StagingConnection for PostgresAdapter {
    async fn exec(&mut self, sql: &str) -> Result<u64> {
        self.execute_statement(sql, &[]).await
    }

    async fn copy_in_chunks(&mut self, sql: &str, chunks: ChunkStream) -> Result<u64> {
        self.copy_in(sql, chunks).await
    }
}

/// Statements of one upsert through a temporary staging table.
#[derive(Debug)]
struct StagedUpsert {
    staging: String,
    create: String,
    copy: String,
    merge: String,
    drop: String,
}

impl StagedUpsert {
    fn new(
        dialect: &PostgresDialect,
        target: &str,
        staging: &str,
        loaded: &[&str],
        pk: &[&str],
        options: &str,
    ) -> Result<Self> {
        let staging_ident = dialect.quote_ident(staging)?;
        let column_list = quote_list(dialect, loaded)?;
        Ok(Self {
            staging: staging.to_string(),
            create: format!(
                "CREATE TEMP TABLE {} AS SELECT {} FROM {} WITH NO DATA",
                staging_ident, column_list, target
            ),
            copy: format!(
                "COPY {} ({}) FROM STDIN ({})",
                staging_ident, column_list, options
            ),
            merge: upsert_sql(dialect, target, &staging_ident, loaded, pk)?,
            drop: format!("DROP TABLE IF EXISTS {}", staging_ident),
        })
    }

    /// Create the staging table, COPY into it and merge into the target.
    /// Once created, the staging table is dropped on every path.
    async fn run<C>(&self, conn: &mut C, chunks: ChunkStream) -> Result<u64>
    where
        C: StagingConnection + ?Sized,
    {
        conn.exec(&self.create).await?;
        let result = async {
            let staged = conn.copy_in_chunks(&self.copy, chunks).await?;
            debug!("Staged {} rows in {}", staged, self.staging);
            debug!("Upsert: {}", self.merge);
            conn.exec(&self.merge).await
        }
        .await;

        if let Err(e) = conn.exec(&self.drop).await {
            warn!("Failed to drop staging table {}: {}", self.staging, e);
        }
        result
    }
}

fn quote_list(dialect: &PostgresDialect, names: &[&str]) -> Result<String> {
    Ok(names
        .iter()
        .map(|n| dialect.quote_ident(n))
        .collect::<Result<Vec<_>>>()?
        .join(", "))
}

/// `INSERT ... SELECT ... ON CONFLICT` from a staging table.
fn upsert_sql(
    dialect: &PostgresDialect,
    target: &str,
    staging: &str,
    columns: &[&str],
    pk: &[&str],
) -> Result<String> {
    let column_list = quote_list(dialect, columns)?;
    let pk_list = quote_list(dialect, pk)?;
    let updates = columns
        .iter()
        .filter(|c| !pk.contains(c))
        .map(|c| {
            let quoted = dialect.quote_ident(c)?;
            Ok(format!("{} = EXCLUDED.{}", quoted, quoted))
        })
        .collect::<Result<Vec<_>>>()?;

    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };
    Ok(format!(
        "INSERT INTO {} ({}) SELECT {} FROM {} ON CONFLICT ({}) {}",
        target, column_list, column_list, staging, pk_list, action
    ))
}

/// Option list for `COPY ... (FORMAT csv, ...)`.
fn copy_options(dialect: &CsvDialect, encoding: &str, header: Option<&str>) -> String {
    let mut options = format!(
        "FORMAT csv, ENCODING {}, DELIMITER {}, QUOTE {}, ESCAPE {}, NULL {}",
        escape_literal(encoding),
        escape_literal(&dialect.delimiter_char().to_string()),
        escape_literal(&dialect.quote_char().to_string()),
        escape_literal(&dialect.escape_char().to_string()),
        escape_literal(&dialect.null),
    );
    if let Some(header) = header {
        options.push_str(", HEADER ");
        options.push_str(header);
    }
    options
}

/// `match` when the file header carries the target names, `true` to skip a
/// header whose names were slugified.
fn header_option(request: &BulkLoad<'_>) -> Option<&'static str> {
    if !request.dialect.header {
        return None;
    }
    if request.columns.iter().all(|c| c.name() == c.slug()) {
        Some("match")
    } else {
        Some("true")
    }
}

fn to_sql_param(param: &SqlParam) -> (Box<dyn ToSql + Sync + Send>, Type) {
    match param {
        SqlParam::Null => (Box::new(None::<String>), Type::TEXT),
        SqlParam::Bool(v) => (Box::new(*v), Type::BOOL),
        SqlParam::Int(v) => (Box::new(*v), Type::INT8),
        SqlParam::Float(v) => (Box::new(*v), Type::FLOAT8),
        SqlParam::Text(v) => (Box::new(v.clone()), Type::TEXT),
    }
}

/// Render one result cell as text.
fn cell_text(row: &Row, idx: usize) -> Result<Option<String>> {
    fn text<T: ToString>(v: Option<T>) -> Option<String> {
        v.map(|v| v.to_string())
    }

    let ty = row.columns()[idx].type_();
    let value = match *ty {
        Type::BOOL => text(row.try_get::<_, Option<bool>>(idx)?),
        Type::INT2 => text(row.try_get::<_, Option<i16>>(idx)?),
        Type::INT4 => text(row.try_get::<_, Option<i32>>(idx)?),
        Type::INT8 => text(row.try_get::<_, Option<i64>>(idx)?),
        Type::OID => text(row.try_get::<_, Option<u32>>(idx)?),
        Type::FLOAT4 => text(row.try_get::<_, Option<f32>>(idx)?),
        Type::FLOAT8 => text(row.try_get::<_, Option<f64>>(idx)?),
        Type::NUMERIC => text(row.try_get::<_, Option<rust_decimal::Decimal>>(idx)?),
        Type::DATE => text(row.try_get::<_, Option<chrono::NaiveDate>>(idx)?),
        Type::TIME => text(row.try_get::<_, Option<chrono::NaiveTime>>(idx)?),
        Type::TIMESTAMP => text(row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)?),
        Type::TIMESTAMPTZ => {
            text(row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)?)
        }
        Type::UUID => text(row.try_get::<_, Option<uuid::Uuid>>(idx)?),
        Type::JSON | Type::JSONB => text(row.try_get::<_, Option<serde_json::Value>>(idx)?),
        _ => row.try_get::<_, Option<String>>(idx).map_err(|_| {
            TransferError::unsupported(
                "postgres",
                format!("reading values of type {} as text", ty.name()),
            )
        })?,
    };
    Ok(value)
}

#[async_trait]
impl DatabaseAdapter for PostgresAdapter {
    fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn dialect(&self) -> &dyn Dialect {
        &self.dialect
    }

    async fn execute_statement(&mut self, sql: &str, params: &[SqlParam]) -> Result<u64> {
        let client = self.client()?;
        if params.is_empty() {
            return Ok(client.execute(sql, &[]).await?);
        }
        let (values, types): (Vec<_>, Vec<_>) = params.iter().map(to_sql_param).unzip();
        let statement = client.prepare_typed(sql, &types).await?;
        let refs: Vec<&(dyn ToSql + Sync)> = values
            .iter()
            .map(|v| v.as_ref() as &(dyn ToSql + Sync))
            .collect();
        Ok(client.execute(&statement, &refs).await?)
    }

    async fn query_rows(
        &mut self,
        sql: &str,
        params: &[SqlParam],
        sink: &mut dyn RowSink,
    ) -> Result<()> {
        let client = self.client()?;
        let (values, types): (Vec<_>, Vec<_>) = params.iter().map(to_sql_param).unzip();
        let statement = client.prepare_typed(sql, &types).await?;
        let names: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        sink.columns(&names).await?;

        let refs: Vec<&(dyn ToSql + Sync)> = values
            .iter()
            .map(|v| v.as_ref() as &(dyn ToSql + Sync))
            .collect();
        let rows = client.query_raw(&statement, refs).await?;
        tokio::pin!(rows);
        while let Some(row) = rows.next().await {
            let row = row?;
            let cells = (0..row.len())
                .map(|i| cell_text(&row, i))
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
        load_columns(
            self.client()?,
            schema,
            table,
            self.dialect.default_temporal_precision(),
        )
        .await
    }

    async fn bulk_load(&mut self, request: BulkLoad<'_>) -> Result<u64> {
        let encoding = backend_encoding(DbKind::Postgres, request.dialect.encoding)?;
        if request.policy == MergePolicy::Upsert {
            return self.upsert(request, &encoding).await;
        }

        let target = self.dialect.qualify(request.schema, request.table)?;
        let columns: Vec<&str> = request.columns.iter().map(Column::slug).collect();
        let column_list = if columns.is_empty() {
            String::new()
        } else {
            format!(" ({})", quote_list(&self.dialect, &columns)?)
        };
        let sql = format!(
            "COPY {}{} FROM STDIN ({})",
            target,
            column_list,
            copy_options(request.dialect, &encoding, header_option(&request))
        );
        let rows = self.copy_in(&sql, request.source.chunks).await?;
        info!("Loaded {} rows into {}", rows, target);
        Ok(rows)
    }

    async fn bulk_unload(
        &mut self,
        request: BulkUnload<'_>,
        out: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<UnloadSummary> {
        let encoding = backend_encoding(DbKind::Postgres, request.dialect.encoding)?;
        let target = self.dialect.qualify(request.schema, request.table)?;
        let columns: Vec<&str> = request.columns.iter().map(Column::slug).collect();
        let select_list = if columns.is_empty() {
            "*".to_string()
        } else {
            quote_list(&self.dialect, &columns)?
        };

        let mut select = format!("SELECT {} FROM {}", select_list, target);
        if let Some(predicate) = request.where_clause {
            select.push_str(" WHERE ");
            select.push_str(predicate);
        }
        let header = request.dialect.header.then_some("true");
        let sql = format!(
            "COPY ({}) TO STDOUT ({})",
            select,
            copy_options(request.dialect, &encoding, header)
        );
        debug!("COPY: {}", sql);

        let stream = self.client()?.copy_out(sql.as_str()).await?;
        tokio::pin!(stream);
        let mut counter = RecordCounter::new(request.dialect);
        let mut bytes = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            counter.feed(&chunk);
            out.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        out.flush().await?;

        let records = counter.finish();
        let rows = if request.dialect.header {
            records.saturating_sub(1)
        } else {
            records
        };
        info!("Unloaded {} rows ({} bytes) from {}", rows, bytes, target);
        Ok(UnloadSummary { rows, bytes })
    }

    async fn set_date_order(&mut self, order: DateOrder) -> Result<()> {
        let sql = format!("SET datestyle = {}", escape_literal(&format!("ISO, {}", order)));
        self.execute_statement(&sql, &[]).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            drop(client);
            if let Some(task) = self.connection_task.take() {
                join_connection_task(task).await;
            }
            debug!("Closed PostgreSQL connection {}", self.descriptor.redacted());
        }
        Ok(())
    }
}

/// Waits for the connection driver; returns false when it panicked or was cancelled.
async fn join_connection_task(task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            warn!("PostgreSQL connection task ended abnormally: {}", e);
            false
        }
    }
}
