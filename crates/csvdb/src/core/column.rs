//! Column model and the compact column spec parser.
//!
//! A column spec looks like `name[:option-option-...]`, for example
//! `id:int-pk-seq`, `price:decimal(10,2)-notnull` or
//! `created:timestamp-default(now())`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransferError};

use super::identifier::SlugStyle;

/// Logical column type shared by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataType {
    Text,
    Varchar,
    Char,
    Int,
    BigInt,
    SmallInt,
    Decimal,
    Bool,
    Date,
    Timestamp,
    TimestampWithTz,
}

impl DataType {
    /// Resolve a type name or one of its aliases (case-insensitive).
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase();
        let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
        let dt = match normalized.as_str() {
            "text" | "string" | "clob" => DataType::Text,
            "varchar" | "character varying" | "nvarchar" | "varchar2" => DataType::Varchar,
            "char" | "character" | "nchar" | "bpchar" => DataType::Char,
            "int" | "integer" | "int4" => DataType::Int,
            "bigint" | "int8" => DataType::BigInt,
            "smallint" | "int2" => DataType::SmallInt,
            "decimal" | "numeric" | "dec" => DataType::Decimal,
            "bool" | "boolean" | "bit" => DataType::Bool,
            "date" => DataType::Date,
            "timestamp" | "datetime" | "datetime2" | "timestamp without time zone" => {
                DataType::Timestamp
            }
            "timestamptz"
            | "timestamp with time zone"
            | "timestamp_with_tz"
            | "datetimeoffset" => DataType::TimestampWithTz,
            _ => return None,
        };
        Some(dt)
    }

    /// Whether `(precision)` is meaningful for this type.
    pub fn accepts_precision(&self) -> bool {
        matches!(
            self,
            DataType::Varchar
                | DataType::Char
                | DataType::Decimal
                | DataType::Timestamp
                | DataType::TimestampWithTz
        )
    }

    /// Whether `(precision,scale)` is meaningful for this type.
    pub fn accepts_scale(&self) -> bool {
        matches!(self, DataType::Decimal)
    }

    pub fn is_temporal(&self) -> bool {
        matches!(self, DataType::Timestamp | DataType::TimestampWithTz)
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, DataType::Int | DataType::BigInt | DataType::SmallInt)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || matches!(self, DataType::Decimal)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Text => "TEXT",
            DataType::Varchar => "VARCHAR",
            DataType::Char => "CHAR",
            DataType::Int => "INT",
            DataType::BigInt => "BIGINT",
            DataType::SmallInt => "SMALLINT",
            DataType::Decimal => "DECIMAL",
            DataType::Bool => "BOOL",
            DataType::Date => "DATE",
            DataType::Timestamp => "TIMESTAMP",
            DataType::TimestampWithTz => "TIMESTAMP_WITH_TZ",
        };
        f.write_str(s)
    }
}

/// Default-value policy of a column.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnDefault {
    #[default]
    None,
    /// Serial / AUTO_INCREMENT / IDENTITY.
    AutoSequence,
    /// Literal name of the file being loaded.
    Filename,
    /// Literal absolute path of the file being loaded.
    Filepath,
    /// Raw SQL expression, emitted verbatim.
    Expression(String),
}

impl ColumnDefault {
    pub fn is_none(&self) -> bool {
        matches!(self, ColumnDefault::None)
    }
}

/// One table or CSV column.
///
/// Fields are private so the `primary key or default => not null` rule holds
/// for every value that can be observed. Deserialization goes through
/// [`RawColumn`] for the same reason.
///
/// The slug is the identifier used in SQL and for matching file columns to
/// table columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawColumn")]
pub struct Column {
    name: String,
    slug: String,
    data_type: Option<DataType>,
    precision: Option<u32>,
    scale: Option<u32>,
    notnull: bool,
    primary_key: bool,
    index: bool,
    default: ColumnDefault,
}

impl Column {
    /// A bare column whose slug is derived with `style`.
    pub fn new(name: impl Into<String>, style: SlugStyle) -> Self {
        let name = name.into();
        let slug = style.slugify(&name);
        Self {
            name,
            slug,
            data_type: None,
            precision: None,
            scale: None,
            notnull: false,
            primary_key: false,
            index: false,
            default: ColumnDefault::None,
        }
    }

    /// A column whose slug is the name itself (introspected columns).
    pub fn verbatim(name: impl Into<String>) -> Self {
        Self::new(name, SlugStyle::Verbatim)
    }

    /// Re-derive the slug from the name with `style`.
    pub fn restyled(mut self, style: SlugStyle) -> Self {
        self.slug = style.slugify(&self.name);
        self
    }

    /// Use `identifier`, the real name of the matching table column, as the
    /// slug. The name is kept, so file headers still read as written.
    pub fn bound_to(mut self, identifier: impl Into<String>) -> Self {
        self.slug = identifier.into();
        self
    }

    /// Parse a compact column spec such as `id:int-pk-seq`.
    pub fn parse(spec: &str, style: SlugStyle) -> Result<Self> {
        parse_spec(spec, style)
    }

    pub fn with_type(mut self, data_type: DataType) -> Self {
        self.data_type = Some(data_type);
        self
    }

    fn with_data_type(mut self, data_type: Option<DataType>) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn with_precision(mut self, precision: Option<u32>, scale: Option<u32>) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    pub fn with_notnull(mut self, notnull: bool) -> Self {
        self.notnull = notnull || self.primary_key || !self.default.is_none();
        self
    }

    pub fn with_primary_key(mut self, primary_key: bool) -> Self {
        self.primary_key = primary_key;
        if primary_key {
            self.notnull = true;
        }
        self
    }

    pub fn with_index(mut self, index: bool) -> Self {
        self.index = index;
        self
    }

    pub fn with_default(mut self, default: ColumnDefault) -> Self {
        if !default.is_none() {
            self.notnull = true;
        }
        self.default = default;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    pub fn data_type(&self) -> Option<DataType> {
        self.data_type
    }

    /// The declared type, or TEXT when none was given.
    pub fn effective_type(&self) -> DataType {
        self.data_type.unwrap_or(DataType::Text)
    }

    pub fn precision(&self) -> Option<u32> {
        self.precision
    }

    pub fn scale(&self) -> Option<u32> {
        self.scale
    }

    pub fn notnull(&self) -> bool {
        self.notnull
    }

    pub fn primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn index(&self) -> bool {
        self.index
    }

    pub fn default(&self) -> &ColumnDefault {
        &self.default
    }

    /// Drop a temporal precision equal to the backend default so that
    /// introspected and parsed columns compare equal.
    pub fn normalize_precision(&mut self, default_temporal_precision: u32) {
        let temporal = self.data_type.map(|t| t.is_temporal()).unwrap_or(false);
        if temporal && self.precision == Some(default_temporal_precision) {
            self.precision = None;
        }
    }

    /// Overlay every field `other` sets onto `self`. The name and slug of
    /// `self` are kept.
    pub fn merge_from(&mut self, other: &Column) {
        if other.data_type.is_some() {
            self.data_type = other.data_type;
            self.precision = other.precision;
            self.scale = other.scale;
        } else {
            if other.precision.is_some() {
                self.precision = other.precision;
            }
            if other.scale.is_some() {
                self.scale = other.scale;
            }
        }
        self.notnull |= other.notnull;
        self.primary_key |= other.primary_key;
        self.index |= other.index;
        if !other.default.is_none() {
            self.default = other.default.clone();
        }
        if self.primary_key || !self.default.is_none() {
            self.notnull = true;
        }
    }
}

/// Wire shape of [`Column`].
#[derive(Deserialize)]
struct RawColumn {
    name: String,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    data_type: Option<DataType>,
    #[serde(default)]
    precision: Option<u32>,
    #[serde(default)]
    scale: Option<u32>,
    #[serde(default)]
    notnull: bool,
    #[serde(default)]
    primary_key: bool,
    #[serde(default)]
    index: bool,
    #[serde(default)]
    default: ColumnDefault,
}

impl From<RawColumn> for Column {
    fn from(raw: RawColumn) -> Self {
        let slug = raw.slug.unwrap_or_else(|| raw.name.clone());
        Column::new(raw.name, SlugStyle::Verbatim)
            .bound_to(slug)
            .with_precision(raw.precision, raw.scale)
            .with_index(raw.index)
            .with_primary_key(raw.primary_key)
            .with_default(raw.default)
            .with_notnull(raw.notnull)
            .with_data_type(raw.data_type)
    }
}

impl FromStr for Column {
    type Err = TransferError;

    fn from_str(s: &str) -> Result<Self> {
        parse_spec(s, SlugStyle::default())
    }
}

// ===== Spec parser =====

fn parse_spec(spec: &str, style: SlugStyle) -> Result<Column> {
    let (name, tail) = match spec.split_once(':') {
        Some((name, tail)) => (name.trim(), Some(tail)),
        None => (spec.trim(), None),
    };
    if name.is_empty() {
        return Err(TransferError::spec(format!(
            "column spec {:?} has an empty name",
            spec
        )));
    }

    let mut column = Column::new(name, style);
    let Some(tail) = tail else {
        return Ok(column);
    };

    for token in split_options(name, tail)? {
        apply_option(&mut column, name, &token)?;
    }
    Ok(column)
}

/// Split the option tail on `-`, ignoring dashes inside parentheses or
/// single-quoted strings.
fn split_options(column: &str, tail: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth: usize = 0;
    let mut in_quote = false;

    for ch in tail.chars() {
        match ch {
            '\'' => {
                in_quote = !in_quote;
                current.push(ch);
            }
            '(' if !in_quote => {
                depth += 1;
                current.push(ch);
            }
            ')' if !in_quote => {
                if depth == 0 {
                    return Err(TransferError::spec(format!(
                        "unbalanced parenthesis in options of column {}",
                        column
                    )));
                }
                depth -= 1;
                current.push(ch);
            }
            '-' if !in_quote && depth == 0 => {
                tokens.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }

    if depth != 0 {
        return Err(TransferError::spec(format!(
            "unbalanced parenthesis in options of column {}",
            column
        )));
    }
    if in_quote {
        return Err(TransferError::spec(format!(
            "unterminated string literal in options of column {}",
            column
        )));
    }
    tokens.push(current);

    let tokens: Vec<String> = tokens
        .into_iter()
        .map(|t| t.trim().to_string())
        .collect();
    if tokens.iter().any(|t| t.is_empty()) {
        return Err(TransferError::spec(format!(
            "empty option in spec of column {}",
            column
        )));
    }
    Ok(tokens)
}

fn apply_option(column: &mut Column, name: &str, token: &str) -> Result<()> {
    let lower = token.to_ascii_lowercase();
    let updated = match lower.as_str() {
        "notnull" => column.clone().with_notnull(true),
        "pk" => column.clone().with_primary_key(true),
        "ix" => column.clone().with_index(true),
        "seq" => column.clone().with_default(ColumnDefault::AutoSequence),
        "filename" => column.clone().with_default(ColumnDefault::Filename),
        "filepath" => column.clone().with_default(ColumnDefault::Filepath),
        _ if lower.starts_with("default(") && lower.ends_with(')') => {
            let expr = token["default(".len()..token.len() - 1].trim();
            if expr.is_empty() {
                return Err(TransferError::spec(format!(
                    "empty default expression for column {}",
                    name
                )));
            }
            column
                .clone()
                .with_default(ColumnDefault::Expression(expr.to_string()))
        }
        _ => {
            let (data_type, precision, scale) = parse_type(name, token)?;
            column
                .clone()
                .with_type(data_type)
                .with_precision(precision, scale)
        }
    };
    *column = updated;
    Ok(())
}

fn parse_type(column: &str, token: &str) -> Result<(DataType, Option<u32>, Option<u32>)> {
    let (type_name, args) = match token.find('(') {
        Some(open) => {
            if !token.ends_with(')') {
                return Err(TransferError::spec(format!(
                    "malformed type {:?} for column {}",
                    token, column
                )));
            }
            (&token[..open], Some(&token[open + 1..token.len() - 1]))
        }
        None => (token, None),
    };

    let data_type = DataType::from_name(type_name).ok_or_else(|| {
        TransferError::spec(format!(
            "unsupported data type {:?} for column {}",
            type_name.trim(),
            column
        ))
    })?;

    let Some(args) = args else {
        return Ok((data_type, None, None));
    };

    let parts: Vec<&str> = args.split(',').map(str::trim).collect();
    let parse_int = |s: &str| -> Result<u32> {
        s.parse::<u32>().map_err(|_| {
            TransferError::spec(format!(
                "invalid precision {:?} for column {}",
                s, column
            ))
        })
    };

    match parts.as_slice() {
        [p] if data_type.accepts_precision() => Ok((data_type, Some(parse_int(p)?), None)),
        [p, s] if data_type.accepts_scale() => {
            Ok((data_type, Some(parse_int(p)?), Some(parse_int(s)?)))
        }
        _ => Err(TransferError::spec(format!(
            "type {} of column {} does not accept ({})",
            data_type, column, args
        ))),
    }
}
