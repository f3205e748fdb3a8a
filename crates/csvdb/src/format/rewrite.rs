//! Opt-in row-by-row rewriting of numeric fields.
//!
//! The raw byte path never inspects field contents. When a file uses a
//! locale-specific number format (`1.234,5`), records are parsed, numeric
//! fields normalized to SQL form (`1234.5`), and the records re-serialized
//! into chunks. Parsing runs on a blocking thread fed through
//! [`SyncIoBridge`].

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::io::SyncIoBridge;
use tracing::debug;

use crate::config::NumericFormat;

use super::dialect::CsvDialect;
use super::ChunkStream;

/// Normalize one numeric field. Values equal to the null marker or blank
/// are returned unchanged.
pub fn normalize_number(value: &str, format: &NumericFormat, null: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() || value == null {
        return value.to_string();
    }
    let mut out = String::with_capacity(trimmed.len());
    for ch in trimmed.chars() {
        if Some(ch) == format.thousands_separator {
            continue;
        }
        if ch == format.decimal_separator {
            out.push('.');
        } else {
            out.push(ch);
        }
    }
    out
}

/// Rewrite the numeric fields (`numeric_fields[i] == true`) of every data
/// record read from `reader`, yielding chunks of roughly `block_size` bytes.
/// The header record, when present, is passed through.
pub fn rewrite_numeric<R>(
    reader: R,
    dialect: CsvDialect,
    numeric_fields: Vec<bool>,
    format: NumericFormat,
    block_size: usize,
) -> ChunkStream
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(4);
    let bridge = SyncIoBridge::new(reader);

    tokio::task::spawn_blocking(move || {
        if let Err(e) = rewrite_blocking(bridge, &dialect, &numeric_fields, &format, block_size, &tx)
        {
            let _ = tx.blocking_send(Err(e));
        }
    });

    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    })
    .boxed()
}

fn rewrite_blocking<R: std::io::Read>(
    reader: R,
    dialect: &CsvDialect,
    numeric_fields: &[bool],
    format: &NumericFormat,
    block_size: usize,
    tx: &mpsc::Sender<std::io::Result<Bytes>>,
) -> std::io::Result<()> {
    let mut csv_reader = dialect.reader_builder().from_reader(reader);
    let mut writer = dialect.writer_builder().from_writer(Vec::with_capacity(block_size));
    let mut record = csv::ByteRecord::new();
    let mut out = csv::ByteRecord::new();
    let mut first = true;
    let mut rows: u64 = 0;

    while csv_reader.read_byte_record(&mut record).map_err(csv_to_io)? {
        if first && dialect.header {
            writer.write_byte_record(&record).map_err(csv_to_io)?;
        } else {
            out.clear();
            for (i, field) in record.iter().enumerate() {
                if numeric_fields.get(i).copied().unwrap_or(false) {
                    let text = String::from_utf8_lossy(field);
                    out.push_field(normalize_number(&text, format, &dialect.null).as_bytes());
                } else {
                    out.push_field(field);
                }
            }
            writer.write_byte_record(&out).map_err(csv_to_io)?;
            rows += 1;
        }
        first = false;

        writer.flush()?;
        if writer.get_ref().len() >= block_size {
            let chunk = std::mem::take(writer.get_mut());
            if tx.blocking_send(Ok(Bytes::from(chunk))).is_err() {
                // receiver dropped; the load was aborted
                return Ok(());
            }
        }
    }

    writer.flush()?;
    let rest = std::mem::take(writer.get_mut());
    if !rest.is_empty() {
        let _ = tx.blocking_send(Ok(Bytes::from(rest)));
    }
    debug!("Rewrote numeric fields of {} rows", rows);
    Ok(())
}

fn csv_to_io(e: csv::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::io::Cursor;

    fn german() -> NumericFormat {
        NumericFormat {
            decimal_separator: ',',
            thousands_separator: Some('.'),
        }
    }

    #[test]
    fn test_normalize_number() {
        assert_eq!(normalize_number("1.234,5", &german(), ""), "1234.5");
        assert_eq!(normalize_number(" -3,0 ", &german(), ""), "-3.0");
        assert_eq!(normalize_number("", &german(), ""), "");
        assert_eq!(normalize_number("NULL", &german(), "NULL"), "NULL");
    }

    #[tokio::test]
    async fn test_rewrite_numeric_stream() {
        let dialect = CsvDialect {
            delimiter: b';',
            crlf: false,
            ..CsvDialect::default()
        };
        let data = b"name;amount\nAnn;\"1.234,50\"\nBo;7,25\n".to_vec();
        let stream = rewrite_numeric(Cursor::new(data), dialect, vec![false, true], german(), 8);
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        let text = String::from_utf8(chunks.concat()).unwrap();
        assert_eq!(text, "name;amount\nAnn;1234.50\nBo;7.25\n");
    }
}
