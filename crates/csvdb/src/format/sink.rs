//! Streams query rows to an async writer as CSV.

use std::borrow::Cow;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::warn;

use crate::core::traits::{RowSink, UnloadSummary};
use crate::error::Result;

use super::dialect::CsvDialect;

/// A [`RowSink`] writing CSV records.
///
/// Records are serialized into an in-memory buffer that is transcoded to the
/// dialect's encoding and flushed to the writer whenever it reaches
/// `block_size`, so memory stays bounded regardless of result size.
pub struct CsvRowSink<'a> {
    out: &'a mut (dyn AsyncWrite + Unpin + Send),
    csv: csv::Writer<Vec<u8>>,
    dialect: &'a CsvDialect,
    block_size: usize,
    columns: Vec<String>,
    rows: u64,
    bytes: u64,
    lossy: bool,
}

impl<'a> CsvRowSink<'a> {
    pub fn new(
        out: &'a mut (dyn AsyncWrite + Unpin + Send),
        dialect: &'a CsvDialect,
        block_size: usize,
    ) -> Self {
        let block_size = block_size.max(1);
        Self {
            out,
            csv: dialect
                .writer_builder()
                .from_writer(Vec::with_capacity(block_size)),
            dialect,
            block_size,
            columns: Vec::new(),
            rows: 0,
            bytes: 0,
            lossy: false,
        }
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    async fn flush_buffer(&mut self) -> Result<()> {
        self.csv.flush()?;
        let buffer = std::mem::take(self.csv.get_mut());
        if buffer.is_empty() {
            return Ok(());
        }

        let encoded: Cow<'_, [u8]> = if self.dialect.encoding == encoding_rs::UTF_8 {
            Cow::Borrowed(buffer.as_slice())
        } else {
            let text = String::from_utf8_lossy(&buffer);
            let (bytes, _, had_errors) = self.dialect.encoding.encode(&text);
            if had_errors {
                self.lossy = true;
            }
            Cow::Owned(bytes.into_owned())
        };

        self.out.write_all(&encoded).await?;
        self.bytes += encoded.len() as u64;
        Ok(())
    }

    /// Flush everything and return what was written.
    pub async fn finish(mut self) -> Result<UnloadSummary> {
        self.flush_buffer().await?;
        self.out.flush().await?;
        if self.lossy {
            warn!(
                "Some characters cannot be represented in {} and were replaced",
                self.dialect.encoding.name()
            );
        }
        Ok(UnloadSummary {
            rows: self.rows,
            bytes: self.bytes,
        })
    }
}

#[async_trait]
impl RowSink for CsvRowSink<'_> {
    async fn columns(&mut self, names: &[String]) -> Result<()> {
        self.columns = names.to_vec();
        if self.dialect.header {
            self.csv.write_record(names)?;
        }
        Ok(())
    }

    async fn row(&mut self, values: Vec<Option<String>>) -> Result<()> {
        let null = self.dialect.null.as_str();
        self.csv
            .write_record(values.iter().map(|v| v.as_deref().unwrap_or(null)))?;
        self.rows += 1;
        if self.csv.get_ref().len() >= self.block_size {
            self.flush_buffer().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_csv_sink_writes_header_nulls_and_quotes() {
        let dialect = CsvDialect {
            delimiter: b';',
            null: "\\N".to_string(),
            crlf: false,
            ..CsvDialect::default()
        };
        let mut out: Vec<u8> = Vec::new();
        let mut sink = CsvRowSink::new(&mut out, &dialect, 4);
        sink.columns(&["id".to_string(), "note".to_string()])
            .await
            .unwrap();
        sink.row(vec![Some("1".into()), Some("a;\"b\"".into())])
            .await
            .unwrap();
        sink.row(vec![Some("2".into()), None]).await.unwrap();
        let summary = sink.finish().await.unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "id;note\n1;\"a;\"\"b\"\"\"\n2;\\N\n");
        assert_eq!(summary.rows, 2);
        assert_eq!(summary.bytes, text.len() as u64);
    }

    #[tokio::test]
    async fn test_csv_sink_transcodes() {
        let dialect = CsvDialect {
            encoding: encoding_rs::WINDOWS_1252,
            header: false,
            crlf: false,
            ..CsvDialect::default()
        };
        let mut out: Vec<u8> = Vec::new();
        let mut sink = CsvRowSink::new(&mut out, &dialect, 8192);
        sink.columns(&["v".to_string()]).await.unwrap();
        sink.row(vec![Some("café".into())]).await.unwrap();
        sink.finish().await.unwrap();
        assert_eq!(out, b"caf\xE9\n".to_vec());
    }
}
