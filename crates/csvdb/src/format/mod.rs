//! CSV format handling at the byte-stream level.
//!
//! - [`dialect`]: resolved dialects and the named-dialect registry
//! - [`sniff`]: delimiter detection and locale defaults
//! - [`encoding`]: encoding labels and backend character-set names
//! - [`input`]: BOM-aware input with a sniffing sample
//! - [`counter`]: quote-aware record counting
//! - [`rewrite`]: opt-in numeric field rewriting
//! - [`sink`]: CSV output for streamed query results

pub mod counter;
pub mod dialect;
pub mod encoding;
pub mod input;
pub mod rewrite;
pub mod sink;
pub mod sniff;

use bytes::Bytes;
use futures::stream::BoxStream;

pub use counter::RecordCounter;
pub use dialect::{CsvDialect, DialectRegistry};
pub use encoding::{backend_encoding, resolve_encoding};
pub use input::CsvInput;
pub use rewrite::rewrite_numeric;
pub use sink::CsvRowSink;

/// CSV bytes moved in bounded chunks.
pub type ChunkStream = BoxStream<'static, std::io::Result<Bytes>>;
