//! CSV dialects and the registry of named presets.

use std::collections::HashMap;

use encoding_rs::Encoding;
use tracing::debug;

use crate::config::CsvOptions;
use crate::error::{Result, TransferError};

use super::encoding::resolve_encoding;
use super::sniff::{locale_default_delimiter, sniff_delimiter};

/// Fully resolved CSV format of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvDialect {
    pub delimiter: u8,
    pub quote: u8,
    /// Escape byte. Equal to `quote` means quotes are escaped by doubling.
    pub escape: u8,
    pub header: bool,
    pub encoding: &'static Encoding,
    /// Text written for, and read as, NULL.
    pub null: String,
    /// Write `\r\n` line endings instead of `\n`.
    pub crlf: bool,
}

impl Default for CsvDialect {
    fn default() -> Self {
        Self {
            delimiter: b',',
            quote: b'"',
            escape: b'"',
            header: true,
            encoding: encoding_rs::UTF_8,
            null: String::new(),
            crlf: true,
        }
    }
}

impl CsvDialect {
    /// Whether embedded quotes are written as `""`.
    pub fn doublequote(&self) -> bool {
        self.escape == self.quote
    }

    pub fn delimiter_char(&self) -> char {
        self.delimiter as char
    }

    pub fn quote_char(&self) -> char {
        self.quote as char
    }

    pub fn escape_char(&self) -> char {
        self.escape as char
    }

    /// A csv reader configured for this dialect. Headers are handled by the
    /// caller, so every record is returned.
    pub fn reader_builder(&self) -> csv::ReaderBuilder {
        let mut builder = csv::ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .quote(self.quote)
            .double_quote(self.doublequote())
            .escape(if self.doublequote() {
                None
            } else {
                Some(self.escape)
            })
            .has_headers(false)
            .flexible(true);
        builder
    }

    /// A csv writer configured for this dialect.
    pub fn writer_builder(&self) -> csv::WriterBuilder {
        let mut builder = csv::WriterBuilder::new();
        builder
            .delimiter(self.delimiter)
            .quote(self.quote)
            .double_quote(self.doublequote())
            .escape(self.escape)
            .has_headers(false)
            .terminator(if self.crlf {
                csv::Terminator::CRLF
            } else {
                csv::Terminator::Any(b'\n')
            });
        builder
    }

    /// Resolve the dialect of a file from caller options.
    ///
    /// With no explicit delimiter, quote, escape or dialect name the
    /// delimiter is sniffed from `sample`; when sniffing fails (or there is
    /// no sample, as on export) the locale default is used.
    pub fn resolve(
        options: &CsvOptions,
        sample: Option<&[u8]>,
        registry: &DialectRegistry,
    ) -> Result<Self> {
        let mut dialect = match &options.dialect {
            Some(name) => registry.require(name)?.clone(),
            None => CsvDialect::default(),
        };

        if let Some(quote) = options.quote {
            dialect.quote = ascii_byte("quote", quote)?;
            if options.escape.is_none() {
                dialect.escape = dialect.quote;
            }
        }
        if let Some(escape) = options.escape {
            dialect.escape = ascii_byte("escape", escape)?;
        }

        match options.delimiter {
            Some(delimiter) => dialect.delimiter = ascii_byte("delimiter", delimiter)?,
            None if options.dialect.is_some() => {}
            None if !options.is_explicit() => {
                dialect.delimiter = sample
                    .and_then(|s| sniff_delimiter(s, dialect.quote))
                    .unwrap_or_else(locale_default_delimiter);
                debug!("Resolved CSV delimiter {:?}", dialect.delimiter as char);
            }
            None => dialect.delimiter = locale_default_delimiter(),
        }

        dialect.header = options.header;
        dialect.encoding = resolve_encoding(&options.encoding)?;
        dialect.null = options.null.clone();

        if dialect.delimiter == dialect.quote {
            return Err(TransferError::Config(format!(
                "CSV delimiter and quote are both {:?}",
                dialect.delimiter as char
            )));
        }
        Ok(dialect)
    }
}

fn ascii_byte(field: &str, ch: char) -> Result<u8> {
    if ch.is_ascii() {
        Ok(ch as u8)
    } else {
        Err(TransferError::Config(format!(
            "CSV {} must be an ASCII character, got {:?}",
            field, ch
        )))
    }
}

/// Named dialect presets.
///
/// Built explicitly and passed by reference; tests can start from an empty
/// registry or clear one.
#[derive(Debug, Clone, Default)]
pub struct DialectRegistry {
    dialects: HashMap<String, CsvDialect>,
}

impl DialectRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding `excel`, `excel-tab` and `unix`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let excel = CsvDialect::default();
        registry.register(
            "excel-tab",
            CsvDialect {
                delimiter: b'\t',
                ..excel.clone()
            },
        );
        registry.register(
            "unix",
            CsvDialect {
                crlf: false,
                ..excel.clone()
            },
        );
        registry.register("excel", excel);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, dialect: CsvDialect) {
        self.dialects.insert(name.into().to_ascii_lowercase(), dialect);
    }

    pub fn get(&self, name: &str) -> Option<&CsvDialect> {
        self.dialects.get(&name.to_ascii_lowercase())
    }

    pub fn require(&self, name: &str) -> Result<&CsvDialect> {
        self.get(name).ok_or_else(|| {
            let mut known: Vec<&str> = self.dialects.keys().map(String::as_str).collect();
            known.sort_unstable();
            TransferError::Config(format!(
                "unknown CSV dialect '{}' (known: {})",
                name,
                known.join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dialects.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn clear(&mut self) {
        self.dialects.clear();
    }
}
