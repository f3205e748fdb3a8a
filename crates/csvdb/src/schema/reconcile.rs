//! Column list reconciliation.
//!
//! [`merge`] is the one primitive: it matches two column lists by slug and
//! overlays the second onto the first. The import and export policies build
//! on it and decide which mismatches are fatal.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::core::column::{Column, ColumnDefault};
use crate::error::{Result, TransferError};

/// Outcome of [`merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Merged {
    /// Target columns in target order, with matching `other` fields applied.
    pub columns: Vec<Column>,
    /// Target columns with no counterpart in `other`.
    pub unmerged: Vec<Column>,
    /// `other` columns no target column matched, in `other` order.
    pub unused: Vec<Column>,
}

/// Match `other` onto `target` by slug.
///
/// When either list is empty the other one is taken wholesale and nothing is
/// reported as unmerged or unused. The result depends only on the inputs.
pub fn merge(target: &[Column], other: &[Column]) -> Merged {
    if target.is_empty() {
        return Merged {
            columns: other.to_vec(),
            ..Merged::default()
        };
    }
    if other.is_empty() {
        return Merged {
            columns: target.to_vec(),
            ..Merged::default()
        };
    }

    let mut consumed = vec![false; other.len()];
    let mut columns = Vec::with_capacity(target.len());
    let mut unmerged = Vec::new();

    for column in target {
        let mut merged = column.clone();
        // first unconsumed match wins, so duplicate slugs pair up in order
        let found = other
            .iter()
            .enumerate()
            .find(|(i, o)| !consumed[*i] && o.slug() == column.slug());
        match found {
            Some((i, o)) => {
                consumed[i] = true;
                merged.merge_from(o);
            }
            None => unmerged.push(column.clone()),
        }
        columns.push(merged);
    }

    let unused = other
        .iter()
        .zip(consumed)
        .filter(|(_, used)| !used)
        .map(|(c, _)| c.clone())
        .collect();

    Merged {
        columns,
        unmerged,
        unused,
    }
}

/// Columns of an import, split by where their values come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSchema {
    /// Columns present in the file, in file order.
    pub file_columns: Vec<Column>,
    /// Columns filled by the database: declared defaults or table-only
    /// columns that may be left to their default or NULL.
    pub default_only: Vec<Column>,
}

impl ImportSchema {
    /// Columns in `CREATE TABLE` order: default-only first.
    pub fn table_columns(&self) -> Vec<Column> {
        self.default_only
            .iter()
            .chain(self.file_columns.iter())
            .cloned()
            .collect()
    }

    /// Default-only columns whose default names the source file.
    pub fn file_defaults(&self) -> impl Iterator<Item = &Column> {
        self.default_only.iter().filter(|c| takes_file_default(c))
    }
}

fn takes_file_default(column: &Column) -> bool {
    matches!(
        column.default(),
        ColumnDefault::Filename | ColumnDefault::Filepath
    )
}

fn require_default(column: &Column) -> Result<()> {
    if column.notnull() && column.default().is_none() {
        return Err(TransferError::reconcile(format!(
            "column {} not found in csv file and without a default value",
            column.slug()
        )));
    }
    Ok(())
}

/// Reconcile the file's header with the caller's column specs.
///
/// Without a header the specs describe the file, except `filename` and
/// `filepath` columns, which never come from file data. With a header the
/// specs refine matching header columns; specs with no header column become
/// default-only, which requires a default when they are not nullable.
pub fn reconcile_file(header: Option<&[Column]>, specs: &[Column]) -> Result<ImportSchema> {
    let Some(header) = header else {
        if specs.is_empty() {
            return Err(TransferError::spec("columns must be given as an argument"));
        }
        let (default_only, file_columns): (Vec<Column>, Vec<Column>) =
            specs.iter().cloned().partition(takes_file_default);
        return Ok(ImportSchema {
            file_columns,
            default_only,
        });
    };

    if header.is_empty() && specs.is_empty() {
        return Err(TransferError::spec(
            "the csv file has an empty header and no columns were given",
        ));
    }

    let Merged {
        columns, unused, ..
    } = merge(header, specs);

    if header.is_empty() {
        // an empty header row means every spec is a file column
        return Ok(ImportSchema {
            file_columns: columns,
            default_only: Vec::new(),
        });
    }

    for column in &unused {
        require_default(column)?;
    }
    check_duplicates(&columns)?;

    Ok(ImportSchema {
        file_columns: columns,
        default_only: unused,
    })
}

/// Reconcile an import against the columns of an existing table.
///
/// `table` must carry slugs in the same style as the file columns. Every
/// file column must exist in the table and takes the table's type. Declared
/// default-only columns must exist too. Table-only columns are default-only
/// and must be nullable or have a default. Every returned column is bound to
/// the real name of its table column.
pub fn reconcile_import(schema: ImportSchema, table: &[Column]) -> Result<ImportSchema> {
    let mut identifiers: HashMap<&str, &str> = HashMap::with_capacity(table.len());
    for column in table {
        if let Some(other) = identifiers.insert(column.slug(), column.name()) {
            return Err(TransferError::reconcile(format!(
                "table columns {} and {} both match {}",
                other,
                column.name(),
                column.slug()
            )));
        }
    }

    let Merged {
        columns: file_columns,
        unmerged,
        unused,
    } = merge(&schema.file_columns, table);

    if let Some(missing) = unmerged.first() {
        return Err(TransferError::reconcile(format!(
            "column {} not found in table",
            missing.slug()
        )));
    }

    // merge takes an empty side wholesale, so the trivial cases are split out
    let (mut default_only, table_only) = match (schema.default_only.is_empty(), unused.is_empty()) {
        (true, _) => (Vec::new(), unused),
        (false, true) => {
            return Err(TransferError::reconcile(format!(
                "column {} not found in table",
                schema.default_only[0].slug()
            )))
        }
        (false, false) => {
            let merged = merge(&schema.default_only, &unused);
            if let Some(missing) = merged.unmerged.first() {
                return Err(TransferError::reconcile(format!(
                    "column {} not found in table",
                    missing.slug()
                )));
            }
            (merged.columns, merged.unused)
        }
    };
    // declared defaults keep precedence over what the table reports
    for (column, declared) in default_only.iter_mut().zip(&schema.default_only) {
        if !declared.default().is_none() {
            *column = column.clone().with_default(declared.default().clone());
        }
    }

    let bind = |columns: Vec<Column>| -> Vec<Column> {
        columns
            .into_iter()
            .map(|c| match identifiers.get(c.slug()) {
                Some(name) => c.bound_to(*name),
                None => c,
            })
            .collect()
    };
    let file_columns = bind(file_columns);
    let mut default_only = bind(default_only);
    let table_only = bind(table_only);

    for column in &table_only {
        require_default(column)?;
    }
    default_only.extend(table_only);

    debug!(
        "Reconciled {} file columns and {} default-only columns",
        file_columns.len(),
        default_only.len()
    );
    Ok(ImportSchema {
        file_columns,
        default_only,
    })
}

/// Reconcile the requested export columns against the table.
///
/// An empty request exports every table column in table order.
pub fn reconcile_export(requested: &[Column], table: &[Column]) -> Result<Vec<Column>> {
    let Merged {
        columns, unmerged, ..
    } = merge(requested, table);
    if let Some(missing) = unmerged.first() {
        return Err(TransferError::reconcile(format!(
            "column {} not found in table",
            missing.slug()
        )));
    }
    Ok(columns)
}

fn check_duplicates(columns: &[Column]) -> Result<()> {
    let mut seen = HashSet::new();
    for column in columns {
        if !seen.insert(column.slug()) {
            return Err(TransferError::spec(format!(
                "column {} appears more than once",
                column.slug()
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::column::DataType;
    use crate::core::identifier::SlugStyle;

    fn col(spec: &str) -> Column {
        Column::parse(spec, SlugStyle::Snake).unwrap()
    }

    fn header(names: &[&str]) -> Vec<Column> {
        names
            .iter()
            .map(|n| Column::new(*n, SlugStyle::Snake))
            .collect()
    }

    fn slugs(columns: &[Column]) -> Vec<&str> {
        columns.iter().map(|c| c.slug()).collect()
    }

    #[test]
    fn test_merge_empty_side_taken_wholesale() {
        let a = vec![col("a:int"), col("b")];
        let merged = merge(&a, &[]);
        assert_eq!(merged.columns, a);
        assert!(merged.unmerged.is_empty() && merged.unused.is_empty());

        let merged = merge(&[], &a);
        assert_eq!(merged.columns, a);
        assert!(merged.unmerged.is_empty() && merged.unused.is_empty());
    }

    #[test]
    fn test_merge_overlays_by_slug() {
        let target = header(&["Id", "First Name", "extra"]);
        let other = vec![
            col("first_name:varchar(40)"),
            col("id:int-pk"),
            col("missing:int"),
        ];
        let merged = merge(&target, &other);

        assert_eq!(slugs(&merged.columns), vec!["id", "first_name", "extra"]);
        assert_eq!(merged.columns[0].data_type(), Some(DataType::Int));
        assert!(merged.columns[0].primary_key());
        assert_eq!(merged.columns[0].name(), "Id");
        assert_eq!(merged.columns[1].precision(), Some(40));
        assert_eq!(slugs(&merged.unmerged), vec!["extra"]);
        assert_eq!(slugs(&merged.unused), vec!["missing"]);
    }

    #[test]
    fn test_merge_is_deterministic() {
        let target = header(&["a", "b", "c", "a"]);
        let other = vec![col("c:date"), col("a:int"), col("z"), col("a:bigint")];
        let first = merge(&target, &other);
        for _ in 0..10 {
            assert_eq!(merge(&target, &other), first);
        }
        assert_eq!(first.columns[0].data_type(), Some(DataType::Int));
        assert_eq!(first.columns[3].data_type(), Some(DataType::BigInt));
    }

    #[test]
    fn test_headerless_requires_columns() {
        let err = reconcile_file(None, &[]).unwrap_err();
        assert!(err.to_string().contains("columns must be given as an argument"));
    }

    #[test]
    fn test_headerless_file_defaults_are_default_only() {
        let specs = vec![col("id:int"), col("src:filename"), col("name")];
        let schema = reconcile_file(None, &specs).unwrap();
        assert_eq!(slugs(&schema.file_columns), vec!["id", "name"]);
        assert_eq!(slugs(&schema.default_only), vec!["src"]);
        assert_eq!(slugs(&schema.table_columns()), vec!["src", "id", "name"]);
        assert_eq!(schema.file_defaults().count(), 1);
    }

    #[test]
    fn test_header_with_specs() {
        let schema = reconcile_file(
            Some(&header(&["ID", "Amount"])),
            &[col("amount:decimal(10,2)"), col("loaded:timestamp-default(now())")],
        )
        .unwrap();
        assert_eq!(slugs(&schema.file_columns), vec!["id", "amount"]);
        assert_eq!(schema.file_columns[1].scale(), Some(2));
        assert_eq!(slugs(&schema.default_only), vec!["loaded"]);
    }

    #[test]
    fn test_header_spec_without_default_is_error() {
        let err = reconcile_file(Some(&header(&["a"])), &[col("id:int-pk")]).unwrap_err();
        assert!(matches!(err, TransferError::Reconcile(_)));
        assert!(err
            .to_string()
            .contains("column id not found in csv file and without a default value"));
    }

    #[test]
    fn test_duplicate_header_rejected() {
        let err = reconcile_file(Some(&header(&["a", "A"])), &[]).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_import_against_table() {
        let file = reconcile_file(Some(&header(&["Name", "Id"])), &[]).unwrap();
        let table = vec![
            Column::verbatim("id").with_type(DataType::Int).with_primary_key(true),
            Column::verbatim("name").with_type(DataType::Text),
            Column::verbatim("note"),
            Column::verbatim("created").with_default(ColumnDefault::Expression("now()".into())),
        ];
        let schema = reconcile_import(file, &table).unwrap();
        assert_eq!(slugs(&schema.file_columns), vec!["name", "id"]);
        assert_eq!(schema.file_columns[1].data_type(), Some(DataType::Int));
        assert_eq!(slugs(&schema.default_only), vec!["note", "created"]);
    }

    #[test]
    fn test_import_table_notnull_without_default_is_error() {
        let file = reconcile_file(Some(&header(&["name"])), &[]).unwrap();
        let table = vec![
            Column::verbatim("name"),
            Column::verbatim("code").with_notnull(true),
        ];
        let err = reconcile_import(file, &table).unwrap_err();
        assert!(err
            .to_string()
            .contains("column code not found in csv file and without a default value"));
    }

    #[test]
    fn test_import_file_column_missing_from_table() {
        let file = reconcile_file(Some(&header(&["name", "bogus"])), &[]).unwrap();
        let err = reconcile_import(file, &[Column::verbatim("name")]).unwrap_err();
        assert!(err.to_string().contains("column bogus not found in table"));
    }

    #[test]
    fn test_import_keeps_declared_file_default() {
        let file = reconcile_file(Some(&header(&["name"])), &[col("src:filename")]).unwrap();
        let table = vec![
            Column::verbatim("src").with_type(DataType::Text),
            Column::verbatim("name"),
        ];
        let schema = reconcile_import(file, &table).unwrap();
        assert_eq!(schema.default_only[0].default(), &ColumnDefault::Filename);
        assert_eq!(schema.file_defaults().count(), 1);
    }

    #[test]
    fn test_import_declared_default_missing_from_table() {
        let file = reconcile_file(Some(&header(&["name"])), &[col("src:filepath")]).unwrap();
        let err = reconcile_import(file, &[Column::verbatim("name")]).unwrap_err();
        assert!(err.to_string().contains("column src not found in table"));
    }

    #[test]
    fn test_export_missing_column_named() {
        let table = vec![Column::verbatim("a"), Column::verbatim("b")];
        let requested = vec![Column::verbatim("b"), Column::verbatim("zz")];
        let err = reconcile_export(&requested, &table).unwrap_err();
        assert!(matches!(err, TransferError::Reconcile(_)));
        assert!(err.to_string().contains("zz"));

        let all = reconcile_export(&[], &table).unwrap();
        assert_eq!(slugs(&all), vec!["a", "b"]);
    }

    #[test]
    fn test_import_binds_mixed_case_table_names() {
        let file = reconcile_file(Some(&header(&["CustomerId", "Full Name"])), &[]).unwrap();
        let table: Vec<Column> = vec![
            Column::verbatim("CustomerId").with_type(DataType::Int).with_primary_key(true),
            Column::verbatim("FullName"),
            Column::verbatim("CreatedAt"),
        ]
        .into_iter()
        .map(|c| c.restyled(SlugStyle::Snake))
        .collect();

        let schema = reconcile_import(file, &table).unwrap();
        assert_eq!(slugs(&schema.file_columns), vec!["CustomerId", "FullName"]);
        assert_eq!(schema.file_columns[0].name(), "CustomerId");
        assert_eq!(schema.file_columns[1].name(), "Full Name");
        assert!(schema.file_columns[0].primary_key());
        assert_eq!(slugs(&schema.default_only), vec!["CreatedAt"]);
    }

    #[test]
    fn test_import_ambiguous_table_slugs_rejected() {
        let file = reconcile_file(Some(&header(&["customer_id"])), &[]).unwrap();
        let table: Vec<Column> = vec![Column::verbatim("CustomerId"), Column::verbatim("customer_id")]
            .into_iter()
            .map(|c| c.restyled(SlugStyle::Snake))
            .collect();
        let err = reconcile_import(file, &table).unwrap_err();
        assert!(matches!(err, TransferError::Reconcile(_)));
    }
}
