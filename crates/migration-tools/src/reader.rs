//! Paged, key-ordered reads from the source historian.

use historiandb_core::{CodecError, Decoded, KeyRange, RecordCodec, SourceTable, StoreResult};
use std::sync::Arc;
use tracing::debug;

/// One page of decoded source rows.
#[derive(Debug, Default)]
pub struct ReadPage {
    /// Decoded records in key order; duplicate keys are kept
    pub records: Vec<Decoded>,
    /// Rows that failed to decode
    pub malformed: Vec<CodecError>,
    /// Rest of the requested range, `None` once it is exhausted
    pub next: Option<KeyRange>,
}

impl ReadPage {
    /// Raw rows consumed by this page.
    pub fn rows_read(&self) -> usize {
        self.records.len() + self.malformed.len()
    }
}

/// Reads a key range page by page and decodes each row.
///
/// A page never ends in the middle of a key: when the row limit is reached,
/// every remaining row sharing the last key is pulled into the same page, so
/// `next` always starts at a key boundary. The reader only scans the range it
/// is given and never looks past its end.
#[derive(Clone)]
pub struct SourceReader {
    source: Arc<dyn SourceTable>,
    codec: RecordCodec,
}

impl SourceReader {
    /// Reader over `source` using `codec` for decoding.
    pub fn new(source: Arc<dyn SourceTable>, codec: RecordCodec) -> Self {
        Self { source, codec }
    }

    /// Read up to `limit` rows of `range`, plus any ties on the last key.
    pub async fn read(&self, range: &KeyRange, limit: usize) -> StoreResult<ReadPage> {
        let limit = limit.max(1);
        let mut rows = self.source.scan(range, limit).await?;

        let next = match rows.last().map(|row| row.key()) {
            Some(last) if rows.len() >= limit => {
                rows.retain(|row| row.key() != last);
                if let Ok(tie) = KeyRange::new(last, last.successor()) {
                    let ties = self.source.scan(&tie, usize::MAX).await?;
                    debug!(key = %last, ties = ties.len(), "completed page on key boundary");
                    rows.extend(ties);
                }
                range.tail_from(last.successor())
            }
            _ => None,
        };

        let mut page = ReadPage {
            next,
            ..Default::default()
        };
        for row in &rows {
            match self.codec.decode(row) {
                Ok(decoded) => page.records.push(decoded),
                Err(err) => page.malformed.push(err),
            }
        }
        Ok(page)
    }
}
