//! Mapping of encoding_rs encodings to backend character-set names.

use encoding_rs::Encoding;

use crate::config::DbKind;
use crate::error::{Result, TransferError};

/// Backend names for one encoding. `None` means the backend has no
/// equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingNames {
    pub postgres: Option<&'static str>,
    pub mysql: Option<&'static str>,
    pub mssql_codepage: Option<u16>,
}

const fn names(
    postgres: Option<&'static str>,
    mysql: Option<&'static str>,
    mssql_codepage: Option<u16>,
) -> EncodingNames {
    EncodingNames {
        postgres,
        mysql,
        mssql_codepage,
    }
}

/// Resolve an encoding label (`utf-8`, `latin1`, `cp1252`, ...).
pub fn resolve_encoding(label: &str) -> Result<&'static Encoding> {
    let trimmed = label.trim();
    if trimmed.is_empty() {
        return Ok(encoding_rs::UTF_8);
    }
    Encoding::for_label(trimmed.as_bytes())
        .ok_or_else(|| TransferError::Config(format!("unknown encoding '{}'", trimmed)))
}

/// Backend names for `encoding`, keyed by its canonical encoding_rs name.
pub fn backend_names(encoding: &'static Encoding) -> EncodingNames {
    match encoding.name() {
        "UTF-8" => names(Some("UTF8"), Some("utf8mb4"), Some(65001)),
        "windows-1252" => names(Some("WIN1252"), Some("latin1"), Some(1252)),
        "windows-1250" => names(Some("WIN1250"), Some("cp1250"), Some(1250)),
        "windows-1251" => names(Some("WIN1251"), Some("cp1251"), Some(1251)),
        "windows-1253" => names(Some("WIN1253"), Some("greek"), Some(1253)),
        "windows-1254" => names(Some("WIN1254"), Some("latin5"), Some(1254)),
        "windows-1255" => names(Some("WIN1255"), Some("hebrew"), Some(1255)),
        "windows-1256" => names(Some("WIN1256"), Some("cp1256"), Some(1256)),
        "windows-1257" => names(Some("WIN1257"), Some("cp1257"), Some(1257)),
        "windows-874" => names(Some("WIN874"), Some("tis620"), Some(874)),
        "ISO-8859-2" => names(Some("LATIN2"), Some("latin2"), Some(28592)),
        "ISO-8859-4" => names(Some("LATIN4"), None, Some(28594)),
        "ISO-8859-5" => names(Some("ISO_8859_5"), None, Some(28595)),
        "ISO-8859-7" => names(Some("ISO_8859_7"), Some("greek"), Some(28597)),
        "ISO-8859-8" => names(Some("ISO_8859_8"), Some("hebrew"), Some(28598)),
        "ISO-8859-13" => names(Some("LATIN7"), Some("latin7"), Some(28603)),
        "ISO-8859-15" => names(Some("LATIN9"), None, Some(28605)),
        "KOI8-R" => names(Some("KOI8R"), Some("koi8r"), Some(20866)),
        "KOI8-U" => names(Some("KOI8U"), Some("koi8u"), Some(21866)),
        "IBM866" => names(Some("WIN866"), Some("cp866"), Some(866)),
        "Shift_JIS" => names(Some("SJIS"), Some("cp932"), Some(932)),
        "EUC-JP" => names(Some("EUC_JP"), Some("ujis"), Some(20932)),
        "EUC-KR" => names(Some("EUC_KR"), Some("euckr"), Some(51949)),
        "GBK" => names(Some("GBK"), Some("gbk"), Some(936)),
        "gb18030" => names(Some("GB18030"), Some("gb18030"), Some(54936)),
        "Big5" => names(Some("BIG5"), Some("big5"), Some(950)),
        "UTF-16LE" => names(None, None, Some(1200)),
        _ => names(None, None, None),
    }
}

/// The name `kind` uses for `encoding` in bulk-load commands.
pub fn backend_encoding(kind: DbKind, encoding: &'static Encoding) -> Result<String> {
    let names = backend_names(encoding);
    let resolved = match kind {
        DbKind::Postgres => names.postgres.map(str::to_string),
        DbKind::Mysql => names.mysql.map(str::to_string),
        DbKind::Mssql => names.mssql_codepage.map(|cp| cp.to_string()),
    };
    resolved.ok_or_else(|| {
        TransferError::unsupported(kind.name(), format!("encoding {}", encoding.name()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_encoding_labels() {
        assert_eq!(resolve_encoding("utf-8").unwrap(), encoding_rs::UTF_8);
        assert_eq!(resolve_encoding("").unwrap(), encoding_rs::UTF_8);
        assert_eq!(resolve_encoding("latin1").unwrap(), encoding_rs::WINDOWS_1252);
        assert!(resolve_encoding("klingon").is_err());
    }

    #[test]
    fn test_backend_encoding() {
        let utf8 = encoding_rs::UTF_8;
        assert_eq!(backend_encoding(DbKind::Postgres, utf8).unwrap(), "UTF8");
        assert_eq!(backend_encoding(DbKind::Mysql, utf8).unwrap(), "utf8mb4");
        assert_eq!(backend_encoding(DbKind::Mssql, utf8).unwrap(), "65001");

        let latin9 = resolve_encoding("iso-8859-15").unwrap();
        assert_eq!(backend_encoding(DbKind::Postgres, latin9).unwrap(), "LATIN9");
        let err = backend_encoding(DbKind::Mysql, latin9).unwrap_err();
        assert!(matches!(err, TransferError::Unsupported { .. }));
    }
}
