//! SQL Server table introspection.

use tiberius::{Client, Query, Row};
use tokio::net::TcpStream;
use tokio_util::compat::Compat;

use crate::core::column::{Column, ColumnDefault, DataType};
use crate::error::Result;

/// Column metadata from `INFORMATION_SCHEMA.COLUMNS` plus key and identity
/// flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MssqlColumnInfo {
    pub column_name: String,
    pub data_type: String,
    /// `-1` for `(max)` types.
    pub character_maximum_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    pub datetime_precision: Option<i32>,
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub is_primary_key: bool,
    pub is_identity: bool,
}

const COLUMNS_SQL: &str = r#"
SELECT c.COLUMN_NAME,
       c.DATA_TYPE,
       CAST(c.CHARACTER_MAXIMUM_LENGTH AS INT),
       CAST(c.NUMERIC_PRECISION AS INT),
       CAST(c.NUMERIC_SCALE AS INT),
       CAST(c.DATETIME_PRECISION AS INT),
       CAST(CASE WHEN c.IS_NULLABLE = 'YES' THEN 1 ELSE 0 END AS BIT),
       c.COLUMN_DEFAULT,
       CAST(CASE WHEN EXISTS (
           SELECT 1
           FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
           JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE k
             ON k.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA
            AND k.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
            AND k.TABLE_NAME = tc.TABLE_NAME
           WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
             AND tc.TABLE_SCHEMA = c.TABLE_SCHEMA
             AND tc.TABLE_NAME = c.TABLE_NAME
             AND k.COLUMN_NAME = c.COLUMN_NAME
       ) THEN 1 ELSE 0 END AS BIT),
       CAST(COLUMNPROPERTY(OBJECT_ID(QUOTENAME(c.TABLE_SCHEMA) + '.' + QUOTENAME(c.TABLE_NAME)),
                           c.COLUMN_NAME, 'IsIdentity') AS BIT)
FROM INFORMATION_SCHEMA.COLUMNS c
WHERE c.TABLE_SCHEMA = @P1 AND c.TABLE_NAME = @P2
ORDER BY c.ORDINAL_POSITION
"#;

const TABLE_EXISTS_SQL: &str =
    "SELECT COUNT(*) FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2";

impl MssqlColumnInfo {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            column_name: row.try_get::<&str, _>(0)?.unwrap_or_default().to_string(),
            data_type: row
                .try_get::<&str, _>(1)?
                .unwrap_or_default()
                .to_lowercase(),
            character_maximum_length: row.try_get::<i32, _>(2)?,
            numeric_precision: row.try_get::<i32, _>(3)?,
            numeric_scale: row.try_get::<i32, _>(4)?,
            datetime_precision: row.try_get::<i32, _>(5)?,
            is_nullable: row.try_get::<bool, _>(6)?.unwrap_or(true),
            column_default: row.try_get::<&str, _>(7)?.map(str::to_string),
            is_primary_key: row.try_get::<bool, _>(8)?.unwrap_or(false),
            is_identity: row.try_get::<bool, _>(9)?.unwrap_or(false),
        })
    }

    /// Convert to the shared column model. `(max)` strings become TEXT.
    pub fn into_column(self, default_temporal_precision: u32) -> Column {
        let to_u32 = |v: Option<i32>| v.and_then(|v| u32::try_from(v).ok());
        let length = self.character_maximum_length;
        let (data_type, precision, scale) = match self.data_type.as_str() {
            "int" => (Some(DataType::Int), None, None),
            "bigint" => (Some(DataType::BigInt), None, None),
            "smallint" | "tinyint" => (Some(DataType::SmallInt), None, None),
            "bit" => (Some(DataType::Bool), None, None),
            "decimal" | "numeric" => (
                Some(DataType::Decimal),
                to_u32(self.numeric_precision),
                to_u32(self.numeric_scale),
            ),
            "varchar" | "nvarchar" if length == Some(-1) => (Some(DataType::Text), None, None),
            "varchar" | "nvarchar" => (Some(DataType::Varchar), to_u32(length), None),
            "char" | "nchar" => (Some(DataType::Char), to_u32(length), None),
            "text" | "ntext" => (Some(DataType::Text), None, None),
            "date" => (Some(DataType::Date), None, None),
            "datetime2" => (
                Some(DataType::Timestamp),
                to_u32(self.datetime_precision),
                None,
            ),
            "datetime" | "smalldatetime" => (Some(DataType::Timestamp), None, None),
            "datetimeoffset" => (
                Some(DataType::TimestampWithTz),
                to_u32(self.datetime_precision),
                None,
            ),
            _ => (None, None, None),
        };

        let default = if self.is_identity {
            ColumnDefault::AutoSequence
        } else {
            match self.column_default {
                Some(expr) => ColumnDefault::Expression(expr),
                None => ColumnDefault::None,
            }
        };

        let mut column = Column::verbatim(self.column_name);
        if let Some(data_type) = data_type {
            column = column.with_type(data_type);
        }
        let mut column = column
            .with_precision(precision, scale)
            .with_primary_key(self.is_primary_key)
            .with_default(default)
            .with_notnull(!self.is_nullable);
        column.normalize_precision(default_temporal_precision);
        column
    }
}

/// Columns of `schema.table`, or `None` when the table does not exist.
pub async fn load_columns(
    client: &mut Client<Compat<TcpStream>>,
    schema: &str,
    table: &str,
    default_temporal_precision: u32,
) -> Result<Option<Vec<Column>>> {
    let mut query = Query::new(COLUMNS_SQL);
    query.bind(schema);
    query.bind(table);
    let rows = query.query(client).await?.into_first_result().await?;

    if rows.is_empty() {
        let mut query = Query::new(TABLE_EXISTS_SQL);
        query.bind(schema);
        query.bind(table);
        let count = query
            .query(client)
            .await?
            .into_row()
            .await?
            .map(|row| row.try_get::<i32, _>(0))
            .transpose()?
            .flatten()
            .unwrap_or(0);
        return Ok((count > 0).then(Vec::new));
    }

    rows.iter()
        .map(|row| {
            MssqlColumnInfo::from_row(row).map(|info| info.into_column(default_temporal_precision))
        })
        .collect::<Result<Vec<_>>>()
        .map(Some)
}
