//! Error types for the transfer library.

use thiserror::Error;

use crate::transfer::JobPhase;

/// Main error type for import/export operations.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Configuration error (invalid YAML, bad connection URL, invalid option values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Column spec or option token rejected before any I/O.
    #[error("Invalid specification: {0}")]
    Spec(String),

    /// Column lists could not be reconciled.
    #[error("Schema reconciliation failed: {0}")]
    Reconcile(String),

    /// The backend does not provide the requested capability.
    #[error("Unsupported on {backend}: {feature}")]
    Unsupported { backend: String, feature: String },

    /// A query rewrite would produce SQL the dialect does not accept.
    #[error("Dialect constraint violated ({dialect}): {message}")]
    DialectConstraint { dialect: String, message: String },

    /// Singleton query returned zero rows.
    #[error("Query returned no rows: {0}")]
    NotFound(String),

    /// Singleton query returned more than one row.
    #[error("Query returned {count} rows where one was expected: {query}")]
    MultipleFound { query: String, count: usize },

    /// Table has no primary key (required for upsert mode).
    #[error("Table {0} has no primary key - upsert mode requires primary keys")]
    NoPrimaryKey(String),

    /// Connection error with context.
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// PostgreSQL protocol or query error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// SQL Server protocol or query error.
    #[error("SQL Server error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// MySQL protocol or query error.
    #[cfg(feature = "mysql")]
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),

    /// CSV parse or write error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error (file operations, stream reads/writes).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Connection URL could not be parsed.
    #[error("Invalid connection URL: {0}")]
    Url(#[from] url::ParseError),

    /// Backend or stream failure annotated with job context. The cause is
    /// reachable through `source()`.
    #[error("{phase} failed for table {table} (file {file})")]
    Job {
        phase: JobPhase,
        table: String,
        file: String,
        #[source]
        source: Box<TransferError>,
    },
}

impl TransferError {
    /// Create a Spec error.
    pub fn spec(message: impl Into<String>) -> Self {
        TransferError::Spec(message.into())
    }

    /// Create a Reconcile error.
    pub fn reconcile(message: impl Into<String>) -> Self {
        TransferError::Reconcile(message.into())
    }

    /// Create an Unsupported capability error.
    pub fn unsupported(backend: impl Into<String>, feature: impl Into<String>) -> Self {
        TransferError::Unsupported {
            backend: backend.into(),
            feature: feature.into(),
        }
    }

    /// Create a DialectConstraint error.
    pub fn dialect_constraint(dialect: impl Into<String>, message: impl Into<String>) -> Self {
        TransferError::DialectConstraint {
            dialect: dialect.into(),
            message: message.into(),
        }
    }

    /// Create a Connection error with context about where it occurred.
    pub fn connection(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        TransferError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Whether this error came from the database or the byte stream rather
    /// than from validation of the job's inputs.
    pub fn is_backend(&self) -> bool {
        match self {
            TransferError::Postgres(_)
            | TransferError::Mssql(_)
            | TransferError::Csv(_)
            | TransferError::Io(_)
            | TransferError::Connection { .. } => true,
            #[cfg(feature = "mysql")]
            TransferError::Mysql(_) => true,
            _ => false,
        }
    }

    /// Annotate backend errors with the job context. Validation errors pass
    /// through unchanged so callers can branch on their kind.
    pub fn in_job(self, phase: JobPhase, table: &str, file: &str) -> Self {
        if !self.is_backend() {
            return self;
        }
        TransferError::Job {
            phase,
            table: table.to_string(),
            file: file.to_string(),
            source: Box::new(self),
        }
    }

    /// The underlying error with any job annotation removed.
    pub fn root(&self) -> &TransferError {
        match self {
            TransferError::Job { source, .. } => source.root(),
            other => other,
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;
