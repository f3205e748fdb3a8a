//! DDL generation for import targets.

use std::path::Path;

use crate::core::column::{Column, ColumnDefault};
use crate::core::traits::Dialect;
use crate::error::{Result, TransferError};

/// Builds `CREATE TABLE` and `CREATE INDEX` statements for one table in one
/// dialect.
///
/// `source` is the absolute path of the file being loaded; it is needed only
/// by `filename` and `filepath` defaults.
pub struct TableDdl<'a> {
    dialect: &'a dyn Dialect,
    schema: &'a str,
    table: &'a str,
    source: Option<&'a Path>,
}

impl<'a> TableDdl<'a> {
    pub fn new(dialect: &'a dyn Dialect, schema: &'a str, table: &'a str) -> Self {
        Self {
            dialect,
            schema,
            table,
            source: None,
        }
    }

    pub fn with_source(mut self, source: Option<&'a Path>) -> Self {
        self.source = source;
        self
    }

    /// The SQL `DEFAULT` expression of a column, if it has one.
    ///
    /// Auto-sequence columns get their values from the column type or the
    /// dialect's sequence clause and have no expression.
    pub fn default_expression(&self, column: &Column) -> Result<Option<String>> {
        match column.default() {
            ColumnDefault::None | ColumnDefault::AutoSequence => Ok(None),
            ColumnDefault::Expression(expr) => Ok(Some(expr.clone())),
            ColumnDefault::Filename => {
                let path = self.require_source(column)?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Ok(Some(self.dialect.escape_literal(&name)))
            }
            ColumnDefault::Filepath => {
                let path = self.require_source(column)?;
                Ok(Some(
                    self.dialect.escape_literal(&path.to_string_lossy()),
                ))
            }
        }
    }

    fn require_source(&self, column: &Column) -> Result<&'a Path> {
        self.source.ok_or_else(|| {
            TransferError::spec(format!(
                "column {} takes its default from the file name, but the input has no path",
                column.slug()
            ))
        })
    }

    /// One column clause of `CREATE TABLE`.
    pub fn column_definition(&self, column: &Column, inline_pk: bool) -> Result<String> {
        let mut clause = format!(
            "{} {}",
            self.dialect.quote_ident(column.slug())?,
            self.dialect.column_type(column)
        );
        if column.default() == &ColumnDefault::AutoSequence {
            if let Some(sequence) = self.dialect.auto_sequence_clause() {
                clause.push(' ');
                clause.push_str(sequence);
            }
        }
        if column.notnull() {
            clause.push_str(" NOT NULL");
        }
        if let Some(expr) = self.default_expression(column)? {
            clause.push_str(" DEFAULT ");
            clause.push_str(&expr);
        }
        if inline_pk && column.primary_key() {
            clause.push_str(" PRIMARY KEY");
        }
        Ok(clause)
    }

    /// `CREATE TABLE` for `columns`, given in table order.
    ///
    /// A single primary key column is declared inline; several become a
    /// trailing composite `PRIMARY KEY (...)`.
    pub fn create_table(&self, columns: &[Column]) -> Result<String> {
        if columns.is_empty() {
            return Err(TransferError::spec(format!(
                "cannot create table {} without columns",
                self.table
            )));
        }

        let keys: Vec<&Column> = columns.iter().filter(|c| c.primary_key()).collect();
        let inline_pk = keys.len() == 1;

        let mut clauses = columns
            .iter()
            .map(|c| self.column_definition(c, inline_pk))
            .collect::<Result<Vec<_>>>()?;

        if keys.len() > 1 {
            let key_list = keys
                .iter()
                .map(|c| self.dialect.quote_ident(c.slug()))
                .collect::<Result<Vec<_>>>()?;
            clauses.push(format!("PRIMARY KEY ({})", key_list.join(", ")));
        }

        Ok(format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.dialect.qualify(self.schema, self.table)?,
            clauses.join(",\n    ")
        ))
    }

    /// One `CREATE INDEX <table>_<slug>_idx` per indexed column.
    pub fn create_indexes(&self, columns: &[Column]) -> Result<Vec<String>> {
        let target = self.dialect.qualify(self.schema, self.table)?;
        columns
            .iter()
            .filter(|c| c.index())
            .map(|c| {
                let name = format!("{}_{}_idx", self.table, c.slug());
                Ok(format!(
                    "CREATE INDEX {} ON {} ({})",
                    self.dialect.quote_ident(&name)?,
                    target,
                    self.dialect.quote_ident(c.slug())?
                ))
            })
            .collect()
    }

    /// `CREATE TABLE` followed by its indexes.
    pub fn statements(&self, columns: &[Column]) -> Result<Vec<String>> {
        let mut statements = vec![self.create_table(columns)?];
        statements.extend(self.create_indexes(columns)?);
        Ok(statements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identifier::SlugStyle;
    use crate::drivers::{DialectImpl, MssqlDialect, PostgresDialect};

    fn col(spec: &str) -> Column {
        Column::parse(spec, SlugStyle::Snake).unwrap()
    }

    fn pg() -> DialectImpl {
        DialectImpl::Postgres(PostgresDialect::new())
    }

    #[test]
    fn test_postgres_serial_inline_pk() {
        let dialect = pg();
        let ddl = TableDdl::new(&dialect, "public", "people");
        let sql = ddl
            .create_table(&[col("id:int-pk-seq"), col("name:varchar(40)"), col("note")])
            .unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE \"public\".\"people\" (\n    \"id\" serial NOT NULL PRIMARY KEY,\n    \"name\" varchar(40),\n    \"note\" text\n)"
        );
    }

    #[test]
    fn test_bigint_sequence_uses_bigserial() {
        let dialect = pg();
        let ddl = TableDdl::new(&dialect, "public", "t");
        let clause = ddl.column_definition(&col("id:bigint-seq"), false).unwrap();
        assert_eq!(clause, "\"id\" bigserial NOT NULL");
    }

    #[test]
    fn test_composite_primary_key_trails() {
        let dialect = pg();
        let ddl = TableDdl::new(&dialect, "s", "t");
        let sql = ddl
            .create_table(&[col("a:int-pk"), col("b:int-pk"), col("c")])
            .unwrap();
        assert!(sql.contains("\"a\" integer NOT NULL,"));
        assert!(sql.ends_with("PRIMARY KEY (\"a\", \"b\")\n)"));
        assert!(!sql.contains("NOT NULL PRIMARY KEY"));
    }

    #[test]
    fn test_mssql_identity_and_default() {
        let dialect = DialectImpl::Mssql(MssqlDialect::new());
        let ddl = TableDdl::new(&dialect, "dbo", "t");
        let clause = ddl.column_definition(&col("id:int-seq"), false).unwrap();
        assert_eq!(clause, "[id] int IDENTITY(1,1) NOT NULL");

        let clause = ddl
            .column_definition(&col("at:timestamp-default(getdate())"), false)
            .unwrap();
        assert!(clause.ends_with("NOT NULL DEFAULT getdate()"));
    }

    #[test]
    fn test_file_defaults_are_literals() {
        let dialect = pg();
        let path = Path::new("/data/in/o'brien.csv");
        let ddl = TableDdl::new(&dialect, "public", "t").with_source(Some(path));
        assert_eq!(
            ddl.default_expression(&col("src:filename")).unwrap().unwrap(),
            "'o''brien.csv'"
        );
        assert_eq!(
            ddl.default_expression(&col("src:filepath")).unwrap().unwrap(),
            "'/data/in/o''brien.csv'"
        );
        assert_eq!(ddl.default_expression(&col("id:seq")).unwrap(), None);

        let streamed = TableDdl::new(&dialect, "public", "t");
        assert!(matches!(
            streamed.default_expression(&col("src:filename")),
            Err(TransferError::Spec(_))
        ));
    }

    #[test]
    fn test_indexes_named_after_table_and_slug() {
        let dialect = pg();
        let ddl = TableDdl::new(&dialect, "public", "people");
        let statements = ddl
            .statements(&[col("id:int-pk"), col("Email:ix"), col("city:ix")])
            .unwrap();
        assert_eq!(statements.len(), 3);
        assert_eq!(
            statements[1],
            "CREATE INDEX \"people_email_idx\" ON \"public\".\"people\" (\"email\")"
        );
        assert!(statements[2].contains("\"people_city_idx\""));
    }

    #[test]
    fn test_empty_column_list_rejected() {
        let dialect = pg();
        assert!(TableDdl::new(&dialect, "public", "t").create_table(&[]).is_err());
    }
}
