//! Delimited-text decoding and batching
//!
//! [`RecordReader`] is a pull-based, finite, non-restartable iterator over the
//! data rows of a document with a header row. [`Batches`] groups any record
//! iterator into fixed-size batches. Both are synchronous so batching can be
//! tested without a runtime.

use std::io::Read;

use stormfeed_common::SourceType;

use crate::error::{IngestError, Result};
use crate::models::{Batch, Record};

/// Lazily decodes CSV rows into [`Record`]s keyed by the header row
pub struct RecordReader<R: Read> {
    source_type: SourceType,
    reader: csv::Reader<R>,
    headers: Vec<String>,
    row: csv::StringRecord,
    rows_read: u64,
    exhausted: bool,
}

impl<R: Read> RecordReader<R> {
    /// Read the header row and prepare to yield records
    ///
    /// An empty input has no headers and yields no records.
    pub fn new(source_type: SourceType, input: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(input);

        let headers = reader
            .headers()
            .map_err(|source| IngestError::Parse { row: 0, source })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        Ok(Self {
            source_type,
            reader,
            headers,
            row: csv::StringRecord::new(),
            rows_read: 0,
            exhausted: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }
}

impl RecordReader<&[u8]> {
    pub fn from_text(source_type: SourceType, text: &str) -> Result<RecordReader<&[u8]>> {
        RecordReader::new(source_type, text.as_bytes())
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        match self.reader.read_record(&mut self.row) {
            Ok(false) => {
                self.exhausted = true;
                None
            },
            Ok(true) => {
                self.rows_read += 1;
                let fields = self
                    .headers
                    .iter()
                    .cloned()
                    .zip(self.row.iter().map(str::to_string))
                    .collect();
                Some(Ok(Record::new(self.source_type, fields)))
            },
            Err(source) => {
                self.rows_read += 1;
                // The reader cannot make progress after an I/O failure
                if matches!(source.kind(), csv::ErrorKind::Io(_)) {
                    self.exhausted = true;
                }
                Some(Err(IngestError::Parse {
                    row: self.rows_read,
                    source,
                }))
            },
        }
    }
}

/// Groups records into batches of at most `size`, keeping order
///
/// The last batch may be smaller; an empty input yields no batches.
pub struct Batches<I> {
    records: I,
    source_type: SourceType,
    size: usize,
    next_sequence: u32,
}

impl<I: Iterator<Item = Record>> Batches<I> {
    pub fn new(records: I, source_type: SourceType, size: usize) -> Self {
        Self {
            records,
            source_type,
            size: size.max(1),
            next_sequence: 1,
        }
    }
}

impl<I: Iterator<Item = Record>> Iterator for Batches<I> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        let records: Vec<Record> = self.records.by_ref().take(self.size).collect();
        if records.is_empty() {
            return None;
        }

        let batch = Batch {
            source_type: self.source_type,
            sequence: self.next_sequence,
            records,
        };
        self.next_sequence += 1;
        Some(batch)
    }
}
