//! Quote-aware record counting over raw CSV bytes.

use super::dialect::CsvDialect;

/// Counts CSV records in a byte stream fed chunk by chunk.
///
/// Line breaks inside quoted fields do not end a record. A final record
/// without a trailing newline is counted.
#[derive(Debug, Clone)]
pub struct RecordCounter {
    quote: u8,
    escape: Option<u8>,
    in_quotes: bool,
    escaped: bool,
    records: u64,
    pending: bool,
}

impl RecordCounter {
    pub fn new(dialect: &CsvDialect) -> Self {
        Self {
            quote: dialect.quote,
            escape: (!dialect.doublequote()).then_some(dialect.escape),
            in_quotes: false,
            escaped: false,
            records: 0,
            pending: false,
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        for &b in chunk {
            if self.escaped {
                self.escaped = false;
                continue;
            }
            if self.in_quotes && Some(b) == self.escape {
                self.escaped = true;
                continue;
            }
            if b == self.quote {
                // doubled quotes toggle twice
                self.in_quotes = !self.in_quotes;
                self.pending = true;
            } else if b == b'\n' && !self.in_quotes {
                if self.pending {
                    self.records += 1;
                }
                self.pending = false;
            } else if b != b'\r' {
                self.pending = true;
            }
        }
    }

    /// Total records seen, including any header row.
    pub fn finish(self) -> u64 {
        self.records + u64::from(self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(dialect: &CsvDialect, chunks: &[&[u8]]) -> u64 {
        let mut counter = RecordCounter::new(dialect);
        for chunk in chunks {
            counter.feed(chunk);
        }
        counter.finish()
    }

    #[test]
    fn test_counts_across_chunk_boundaries() {
        let dialect = CsvDialect::default();
        assert_eq!(count(&dialect, &[b"id,name\r\n1,", b"\"multi\nline\"\r\n2,x"]), 3);
        assert_eq!(count(&dialect, &[b"a\n", b"\n", b"b\n"]), 2);
        assert_eq!(count(&dialect, &[b""]), 0);
    }

    #[test]
    fn test_doubled_and_escaped_quotes() {
        let dialect = CsvDialect::default();
        assert_eq!(count(&dialect, &[b"\"say \"\"hi\n\"\"\"\n2\n"]), 2);

        let backslash = CsvDialect {
            escape: b'\\',
            ..CsvDialect::default()
        };
        assert_eq!(count(&backslash, &[b"\"a\\\"\nb\"\n", b"c\n"]), 2);
    }
}
