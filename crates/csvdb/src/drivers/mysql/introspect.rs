//! MySQL table introspection.

use mysql_async::prelude::*;
use mysql_async::Conn;

use crate::core::column::{Column, ColumnDefault, DataType};
use crate::error::Result;

/// Column metadata as reported by `information_schema.COLUMNS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlColumnInfo {
    pub column_name: String,
    pub data_type: String,
    /// Full type, e.g. `tinyint(1)` or `varchar(40)`.
    pub column_type: String,
    pub character_maximum_length: Option<u64>,
    pub numeric_precision: Option<u64>,
    pub numeric_scale: Option<u64>,
    pub datetime_precision: Option<u64>,
    pub is_nullable: bool,
    pub column_default: Option<String>,
    pub is_primary_key: bool,
    pub auto_increment: bool,
}

const COLUMNS_SQL: &str = r#"
SELECT COLUMN_NAME, DATA_TYPE, COLUMN_TYPE,
       CHARACTER_MAXIMUM_LENGTH, NUMERIC_PRECISION, NUMERIC_SCALE, DATETIME_PRECISION,
       IS_NULLABLE, COLUMN_DEFAULT, COLUMN_KEY, EXTRA
FROM information_schema.COLUMNS
WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
ORDER BY ORDINAL_POSITION
"#;

const TABLE_EXISTS_SQL: &str =
    "SELECT COUNT(*) FROM information_schema.TABLES WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?";

type ColumnRow = (
    String,
    String,
    String,
    Option<u64>,
    Option<u64>,
    Option<u64>,
    Option<u64>,
    String,
    Option<String>,
    String,
    String,
);

impl MysqlColumnInfo {
    fn from_row(row: ColumnRow) -> Self {
        let (
            column_name,
            data_type,
            column_type,
            character_maximum_length,
            numeric_precision,
            numeric_scale,
            datetime_precision,
            is_nullable,
            column_default,
            column_key,
            extra,
        ) = row;
        Self {
            column_name,
            data_type: data_type.to_lowercase(),
            column_type: column_type.to_lowercase(),
            character_maximum_length,
            numeric_precision,
            numeric_scale,
            datetime_precision,
            is_nullable: is_nullable.eq_ignore_ascii_case("YES"),
            column_default,
            is_primary_key: column_key.eq_ignore_ascii_case("PRI"),
            auto_increment: extra.to_lowercase().contains("auto_increment"),
        }
    }

    /// Convert to the shared column model.
    pub fn into_column(self, default_temporal_precision: u32) -> Column {
        let to_u32 = |v: Option<u64>| v.and_then(|v| u32::try_from(v).ok());
        let (data_type, precision, scale) = match self.data_type.as_str() {
            "tinyint" if self.column_type.starts_with("tinyint(1)") => {
                (Some(DataType::Bool), None, None)
            }
            "int" | "integer" | "mediumint" => (Some(DataType::Int), None, None),
            "bigint" => (Some(DataType::BigInt), None, None),
            "smallint" | "tinyint" => (Some(DataType::SmallInt), None, None),
            "decimal" | "numeric" => (
                Some(DataType::Decimal),
                to_u32(self.numeric_precision),
                to_u32(self.numeric_scale),
            ),
            "varchar" => (
                Some(DataType::Varchar),
                to_u32(self.character_maximum_length),
                None,
            ),
            "char" => (
                Some(DataType::Char),
                to_u32(self.character_maximum_length),
                None,
            ),
            "text" | "tinytext" | "mediumtext" | "longtext" => (Some(DataType::Text), None, None),
            "date" => (Some(DataType::Date), None, None),
            "datetime" => (
                Some(DataType::Timestamp),
                to_u32(self.datetime_precision),
                None,
            ),
            "timestamp" => (
                Some(DataType::TimestampWithTz),
                to_u32(self.datetime_precision),
                None,
            ),
            _ => (None, None, None),
        };

        let default = if self.auto_increment {
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
    conn: &mut Conn,
    schema: &str,
    table: &str,
    default_temporal_precision: u32,
) -> Result<Option<Vec<Column>>> {
    let rows: Vec<ColumnRow> = conn.exec(COLUMNS_SQL, (schema, table)).await?;
    if rows.is_empty() {
        let count: Option<u64> = conn.exec_first(TABLE_EXISTS_SQL, (schema, table)).await?;
        return Ok((count.unwrap_or(0) > 0).then(Vec::new));
    }
    Ok(Some(
        rows.into_iter()
            .map(|row| MysqlColumnInfo::from_row(row).into_column(default_temporal_precision))
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str, data_type: &str, column_type: &str) -> ColumnRow {
        (
            name.to_string(),
            data_type.to_uppercase(),
            column_type.to_string(),
            None,
            None,
            None,
            None,
            "YES".to_string(),
            None,
            String::new(),
            String::new(),
        )
    }

    #[test]
    fn test_auto_increment_primary_key() {
        let mut r = row("id", "int", "int");
        r.7 = "NO".to_string();
        r.9 = "PRI".to_string();
        r.10 = "auto_increment".to_string();
        let col = MysqlColumnInfo::from_row(r).into_column(0);
        assert_eq!(col.data_type(), Some(DataType::Int));
        assert_eq!(col.default(), &ColumnDefault::AutoSequence);
        assert!(col.primary_key());
        assert!(col.notnull());
    }

    #[test]
    fn test_tinyint_one_is_bool() {
        let col = MysqlColumnInfo::from_row(row("flag", "tinyint", "tinyint(1)")).into_column(0);
        assert_eq!(col.data_type(), Some(DataType::Bool));
        let col = MysqlColumnInfo::from_row(row("n", "tinyint", "tinyint(4)")).into_column(0);
        assert_eq!(col.data_type(), Some(DataType::SmallInt));
    }

    #[test]
    fn test_datetime_precision_normalized() {
        let mut r = row("at", "datetime", "datetime");
        r.6 = Some(0);
        let col = MysqlColumnInfo::from_row(r).into_column(0);
        assert_eq!(col.data_type(), Some(DataType::Timestamp));
        assert_eq!(col.precision(), None);

        let mut r = row("at", "datetime", "datetime(3)");
        r.6 = Some(3);
        let col = MysqlColumnInfo::from_row(r).into_column(0);
        assert_eq!(col.precision(), Some(3));
    }

    #[test]
    fn test_default_implies_notnull() {
        let mut r = row("status", "varchar", "varchar(10)");
        r.3 = Some(10);
        r.8 = Some("new".to_string());
        let col = MysqlColumnInfo::from_row(r).into_column(0);
        assert!(col.notnull());
        assert_eq!(col.precision(), Some(10));
    }
}
