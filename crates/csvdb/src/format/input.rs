//! BOM-aware CSV input with a sniffing sample and chunked streaming.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::ReaderStream;

use crate::error::{Result, TransferError};

use super::dialect::CsvDialect;
use super::ChunkStream;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// A CSV byte source whose first bytes have been read into memory.
///
/// The sample is used for sniffing and header parsing; streaming replays it
/// before the rest of the reader so no bytes are lost. A UTF-8 BOM is
/// removed from the sample once.
pub struct CsvInput {
    path: Option<PathBuf>,
    sample: Bytes,
    rest: Box<dyn AsyncRead + Send + Unpin>,
    eof: bool,
    had_bom: bool,
}

impl CsvInput {
    /// Open a file.
    pub async fn open(path: impl AsRef<Path>, sample_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await.map_err(|e| {
            TransferError::Io(std::io::Error::new(
                e.kind(),
                format!("cannot open {}: {}", path.display(), e),
            ))
        })?;
        let mut input = Self::from_reader(file, sample_size).await?;
        input.path = Some(path.to_path_buf());
        Ok(input)
    }

    /// Wrap any async reader.
    pub async fn from_reader<R>(reader: R, sample_size: usize) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut reader: Box<dyn AsyncRead + Send + Unpin> = Box::new(reader);
        let wanted = sample_size.max(UTF8_BOM.len());
        let mut buf = vec![0u8; wanted];
        let mut filled = 0;
        let mut eof = false;
        while filled < wanted {
            let n = reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                eof = true;
                break;
            }
            filled += n;
        }
        buf.truncate(filled);

        let had_bom = buf.starts_with(UTF8_BOM);
        let sample = if had_bom {
            Bytes::from(buf).slice(UTF8_BOM.len()..)
        } else {
            Bytes::from(buf)
        };

        Ok(Self {
            path: None,
            sample,
            rest: reader,
            eof,
            had_bom,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The buffered prefix, without BOM.
    pub fn sample(&self) -> &[u8] {
        &self.sample
    }

    pub fn had_bom(&self) -> bool {
        self.had_bom
    }

    /// Whether the sample holds the entire input.
    pub fn is_fully_buffered(&self) -> bool {
        self.eof
    }

    /// Parse the first record of the sample as the header row.
    ///
    /// Returns `None` for empty input.
    pub fn read_header(&self, dialect: &CsvDialect) -> Result<Option<Vec<String>>> {
        let (text, _, had_errors) = dialect.encoding.decode(&self.sample);
        if had_errors {
            tracing::warn!(
                "Header sample is not valid {}; undecodable bytes were replaced",
                dialect.encoding.name()
            );
        }
        if text.trim().is_empty() {
            return Ok(None);
        }

        let mut reader = dialect.reader_builder().from_reader(text.as_bytes());
        let mut record = csv::StringRecord::new();
        if !reader.read_record(&mut record)? {
            return Ok(None);
        }
        // a header cut off by the sample boundary ends exactly at the buffer end
        let consumed = reader.position().byte() as usize;
        if !self.eof && consumed >= text.len() && !text.ends_with('\n') {
            return Err(TransferError::spec(
                "header row is longer than the sniffing sample; increase csv.sample_size",
            ));
        }
        Ok(Some(record.iter().map(|f| f.trim().to_string()).collect()))
    }

    /// Stream the whole input (sample first) in chunks of `block_size`.
    pub fn into_chunks(self, block_size: usize) -> ChunkStream {
        ReaderStream::with_capacity(self.into_reader(), block_size.max(1)).boxed()
    }

    /// The whole input (sample first) as one reader.
    pub fn into_reader(self) -> impl AsyncRead + Send + Unpin + 'static {
        Cursor::new(self.sample).chain(self.rest)
    }
}
