//! PostgreSQL table introspection.

use tokio_postgres::{Client, Row};

use crate::core::column::{Column, ColumnDefault, DataType};
use crate::error::Result;

/// Column metadata as reported by `information_schema.columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub character_maximum_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
    pub datetime_precision: Option<i32>,
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub is_primary_key: bool,
}

// information_schema uses domain types; cast so the driver sees plain ones
const COLUMNS_SQL: &str = r#"
SELECT c.column_name::text,
       c.data_type::text,
       c.character_maximum_length::int,
       c.numeric_precision::int,
       c.numeric_scale::int,
       c.datetime_precision::int,
       (c.is_nullable::text = 'YES') AS is_nullable,
       c.column_default::text,
       EXISTS (
           SELECT 1
           FROM information_schema.table_constraints tc
           JOIN information_schema.key_column_usage k
             ON k.constraint_schema = tc.constraint_schema
            AND k.constraint_name = tc.constraint_name
            AND k.table_name = tc.table_name
           WHERE tc.constraint_type = 'PRIMARY KEY'
             AND tc.table_schema = c.table_schema
             AND tc.table_name = c.table_name
             AND k.column_name = c.column_name
       ) AS is_primary_key
FROM information_schema.columns c
WHERE c.table_schema = $1 AND c.table_name = $2
ORDER BY c.ordinal_position
"#;

const TABLE_EXISTS_SQL: &str = "SELECT EXISTS (SELECT 1 FROM information_schema.tables \
     WHERE table_schema = $1 AND table_name = $2)";

impl PgColumnInfo {
    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            column_name: row.try_get(0)?,
            data_type: row.try_get(1)?,
            character_maximum_length: row.try_get(2)?,
            numeric_precision: row.try_get(3)?,
            numeric_scale: row.try_get(4)?,
            datetime_precision: row.try_get(5)?,
            is_nullable: row.try_get(6)?,
            column_default: row.try_get(7)?,
            is_primary_key: row.try_get(8)?,
        })
    }

    /// Convert to the shared column model. Types outside the model are left
    /// untyped and handled as text.
    pub fn into_column(self, default_temporal_precision: u32) -> Column {
        let to_u32 = |v: Option<i32>| v.and_then(|v| u32::try_from(v).ok());
        let (data_type, precision, scale) = match self.data_type.as_str() {
            "integer" => (Some(DataType::Int), None, None),
            "bigint" => (Some(DataType::BigInt), None, None),
            "smallint" => (Some(DataType::SmallInt), None, None),
            "numeric" => (
                Some(DataType::Decimal),
                to_u32(self.numeric_precision),
                to_u32(self.numeric_scale),
            ),
            "character varying" => (
                Some(DataType::Varchar),
                to_u32(self.character_maximum_length),
                None,
            ),
            "character" => (
                Some(DataType::Char),
                to_u32(self.character_maximum_length),
                None,
            ),
            "text" => (Some(DataType::Text), None, None),
            "boolean" => (Some(DataType::Bool), None, None),
            "date" => (Some(DataType::Date), None, None),
            "timestamp without time zone" => (
                Some(DataType::Timestamp),
                to_u32(self.datetime_precision),
                None,
            ),
            "timestamp with time zone" => (
                Some(DataType::TimestampWithTz),
                to_u32(self.datetime_precision),
                None,
            ),
            _ => (None, None, None),
        };

        let default = match self.column_default {
            Some(expr) if expr.starts_with("nextval(") => ColumnDefault::AutoSequence,
            Some(expr) => ColumnDefault::Expression(expr),
            None => ColumnDefault::None,
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
    client: &Client,
    schema: &str,
    table: &str,
    default_temporal_precision: u32,
) -> Result<Option<Vec<Column>>> {
    let rows = client.query(COLUMNS_SQL, &[&schema, &table]).await?;
    if rows.is_empty() {
        let exists: bool = client
            .query_one(TABLE_EXISTS_SQL, &[&schema, &table])
            .await?
            .try_get(0)?;
        return Ok(exists.then(Vec::new));
    }

    rows.iter()
        .map(|row| PgColumnInfo::from_row(row).map(|info| info.into_column(default_temporal_precision)))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, data_type: &str) -> PgColumnInfo {
        PgColumnInfo {
            column_name: name.to_string(),
            data_type: data_type.to_string(),
            character_maximum_length: None,
            numeric_precision: None,
            numeric_scale: None,
            datetime_precision: None,
            is_nullable: true,
            column_default: None,
            is_primary_key: false,
        }
    }

    #[test]
    fn test_serial_primary_key() {
        let col = PgColumnInfo {
            is_nullable: false,
            is_primary_key: true,
            column_default: Some("nextval('people_id_seq'::regclass)".to_string()),
            numeric_precision: Some(32),
            ..info("id", "integer")
        }
        .into_column(6);
        assert_eq!(col.slug(), "id");
        assert_eq!(col.data_type(), Some(DataType::Int));
        assert_eq!(col.default(), &ColumnDefault::AutoSequence);
        assert!(col.primary_key());
        assert!(col.notnull());
        assert_eq!(col.precision(), None);
    }

    #[test]
    fn test_default_implies_notnull() {
        let col = PgColumnInfo {
            column_default: Some("now()".to_string()),
            datetime_precision: Some(6),
            ..info("created", "timestamp with time zone")
        }
        .into_column(6);
        assert!(col.notnull());
        assert_eq!(col.precision(), None);
        assert_eq!(col.data_type(), Some(DataType::TimestampWithTz));
    }

    #[test]
    fn test_numeric_and_varchar() {
        let col = PgColumnInfo {
            numeric_precision: Some(10),
            numeric_scale: Some(2),
            ..info("amount", "numeric")
        }
        .into_column(6);
        assert_eq!(col.precision(), Some(10));
        assert_eq!(col.scale(), Some(2));

        let col = PgColumnInfo {
            character_maximum_length: Some(40),
            ..info("First Name", "character varying")
        }
        .into_column(6);
        assert_eq!(col.slug(), "First Name");
        assert_eq!(col.precision(), Some(40));
    }

    #[test]
    fn test_unknown_type_stays_untyped() {
        let col = info("doc", "jsonb").into_column(6);
        assert_eq!(col.data_type(), None);
        assert!(!col.notnull());
    }
}
