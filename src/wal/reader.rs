use std::fs;
use std::path::Path;

use tracing::warn;

use crate::error::{Error, Result};
use crate::wal::record::{Frame, WALRecord};

/// Reads WAL records from a file for crash recovery.
///
/// Loads the entire file into memory, then iterates record by record.
/// Damage at the tail (a crash mid-append) ends the log quietly. A bad
/// checksum on a complete record that is followed by more data cannot be
/// a torn write and is reported as corruption.
pub struct WALReader {
    data: Vec<u8>,
    name: String,
}

impl WALReader {
    /// Open a WAL file for reading.
    pub fn new(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Ok(WALReader {
            data,
            name: path.display().to_string(),
        })
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        WALReader {
            data,
            name: "<memory>".to_string(),
        }
    }

    /// Create an iterator over all valid records in the WAL.
    pub fn iter(&self) -> WALIterator<'_> {
        WALIterator {
            data: &self.data,
            name: &self.name,
            offset: 0,
            done: false,
        }
    }
}

/// Iterator over WAL records. Yields records until EOF, a torn tail, or
/// mid-log corruption (yielded once as an error).
pub struct WALIterator<'a> {
    data: &'a [u8],
    name: &'a str,
    offset: usize,
    done: bool,
}

impl WALIterator<'_> {
    /// Bytes consumed by the records yielded so far.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Iterator for WALIterator<'_> {
    type Item = Result<WALRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.data.len() {
            return None;
        }

        let remaining = &self.data[self.offset..];
        match WALRecord::read_frame(remaining) {
            Frame::Record(record, len) => {
                self.offset += len;
                Some(Ok(record))
            }
            Frame::Truncated => {
                self.done = true;
                warn!(
                    wal = self.name,
                    offset = self.offset,
                    dropped = remaining.len(),
                    "ignoring truncated WAL tail"
                );
                None
            }
            Frame::BadChecksum(len) if len == remaining.len() => {
                self.done = true;
                warn!(wal = self.name, offset = self.offset, "ignoring torn final WAL record");
                None
            }
            Frame::BadChecksum(_) => {
                self.done = true;
                Some(Err(Error::corruption(format!(
                    "{}: checksum mismatch at offset {}",
                    self.name, self.offset
                ))))
            }
        }
    }
}
