//! Configuration validation.

use super::{CsvOptions, ExportOptions, ImportOptions, JobConfig, MergePolicy};
use crate::error::{Result, TransferError};

/// Validate a job file.
pub fn validate(config: &JobConfig) -> Result<()> {
    let descriptor = config.connection.descriptor()?;

    if descriptor.host().is_empty() {
        return Err(TransferError::Config("connection.host is required".into()));
    }
    if descriptor.database().is_empty() {
        return Err(TransferError::Config("connection.database is required".into()));
    }

    match (&config.import, &config.export) {
        (Some(import), None) => validate_import(import)?,
        (None, Some(export)) => validate_export(export)?,
        (Some(_), Some(_)) => {
            return Err(TransferError::Config(
                "a job is either an import or an export, not both".into(),
            ))
        }
        (None, None) => {
            return Err(TransferError::Config(
                "job needs an 'import' or an 'export' section".into(),
            ))
        }
    }

    let table_given = config
        .import
        .as_ref()
        .map(|i| i.table.is_some())
        .or_else(|| config.export.as_ref().map(|e| e.table.is_some()))
        .unwrap_or(false);
    if !table_given && descriptor.bound_table().is_none() {
        return Err(TransferError::Config(
            "table is required (in the job or in the connection URL)".into(),
        ));
    }

    Ok(())
}

pub fn validate_import(options: &ImportOptions) -> Result<()> {
    if options.file.as_os_str().is_empty() {
        return Err(TransferError::Config("import.file is required".into()));
    }
    if options.recreate && options.merge == MergePolicy::Upsert {
        return Err(TransferError::Config(
            "import.recreate cannot be combined with merge: upsert".into(),
        ));
    }
    if let Some(numeric) = &options.numeric {
        if Some(numeric.decimal_separator) == numeric.thousands_separator {
            return Err(TransferError::Config(
                "import.numeric decimal and thousands separators must differ".into(),
            ));
        }
    }
    validate_csv(&options.csv)
}

pub fn validate_export(options: &ExportOptions) -> Result<()> {
    if options.file.as_os_str().is_empty() {
        return Err(TransferError::Config("export.file is required".into()));
    }
    if let Some(clause) = &options.where_clause {
        if clause.trim().is_empty() {
            return Err(TransferError::Config(
                "export.where_clause cannot be blank".into(),
            ));
        }
    }
    validate_csv(&options.csv)
}

fn validate_csv(csv: &CsvOptions) -> Result<()> {
    if csv.block_size == 0 {
        return Err(TransferError::Config(
            "csv.block_size must be at least 1".into(),
        ));
    }
    if csv.sample_size == 0 {
        return Err(TransferError::Config(
            "csv.sample_size must be at least 1".into(),
        ));
    }
    for (field, ch) in [
        ("delimiter", csv.delimiter),
        ("quote", csv.quote),
        ("escape", csv.escape),
    ] {
        if let Some(ch) = ch {
            if !ch.is_ascii() || ch == '\n' || ch == '\r' {
                return Err(TransferError::Config(format!(
                    "csv.{} must be a single ASCII character other than a line break, got {:?}",
                    field, ch
                )));
            }
        }
    }
    if csv.delimiter.is_some() && csv.delimiter == csv.quote {
        return Err(TransferError::Config(
            "csv.delimiter and csv.quote must differ".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;

    fn valid_config() -> JobConfig {
        JobConfig {
            connection: ConnectionConfig::Url("postgres://u:p@localhost/db".to_string()),
            import: Some(ImportOptions {
                table: Some("people".to_string()),
                ..ImportOptions::new("people.csv")
            }),
            export: None,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_import_and_export_are_exclusive() {
        let mut config = valid_config();
        config.export = Some(ExportOptions::new("out.csv"));
        assert!(validate(&config).is_err());

        config.import = None;
        config.export = None;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_table_may_come_from_url() {
        let mut config = valid_config();
        if let Some(import) = config.import.as_mut() {
            import.table = None;
        }
        assert!(validate(&config).is_err());

        config.connection = ConnectionConfig::Url("postgres://u@localhost/db/people".into());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_recreate_with_upsert_rejected() {
        let mut options = ImportOptions::new("a.csv");
        options.recreate = true;
        options.merge = MergePolicy::Upsert;
        assert!(validate_import(&options).is_err());
    }

    #[test]
    fn test_csv_characters_validated() {
        let mut options = ExportOptions::new("a.csv");
        options.csv.delimiter = Some('\n');
        assert!(validate_export(&options).is_err());

        options.csv.delimiter = Some(';');
        options.csv.quote = Some(';');
        assert!(validate_export(&options).is_err());

        options.csv.quote = Some('"');
        options.csv.block_size = 0;
        assert!(validate_export(&options).is_err());
    }
}
