//! Append-only log of version edits.
//!
//! Record layout: `[len: u64 BE][json edit][crc32(json): u32 BE]`.
//! A record cut short at the end of the file is the remains of an
//! interrupted write and is ignored. A complete record with a bad checksum
//! is corruption.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Error, Result};
use crate::version::VersionEdit;

const LEN_SIZE: usize = 8;
const CRC_SIZE: usize = 4;

pub struct Manifest {
    file: File,
    path: PathBuf,
    number: u64,
    use_fsync: bool,
}

impl Manifest {
    /// Creates a new, empty manifest. Fails if the file exists.
    pub fn create(path: &Path, number: u64, use_fsync: bool) -> Result<Self> {
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            number,
            use_fsync,
        })
    }

    /// Reads every intact edit of the manifest at `path`.
    pub fn read_edits(path: &Path) -> Result<Vec<VersionEdit>> {
        let buf = fs::read(path)?;
        let mut offset = 0usize;
        let mut edits = Vec::new();
        while offset < buf.len() {
            let Some(len_bytes) = buf.get(offset..offset + LEN_SIZE) else {
                warn!(manifest = %path.display(), offset, "ignoring truncated manifest record");
                break;
            };
            let mut raw = [0u8; LEN_SIZE];
            raw.copy_from_slice(len_bytes);
            let len = u64::from_be_bytes(raw) as usize;

            let body_start = offset + LEN_SIZE;
            let body_end = body_start.saturating_add(len);
            let crc_end = body_end.saturating_add(CRC_SIZE);
            if crc_end > buf.len() {
                warn!(manifest = %path.display(), offset, "ignoring truncated manifest record");
                break;
            }
            let body = &buf[body_start..body_end];
            let mut crc_raw = [0u8; CRC_SIZE];
            crc_raw.copy_from_slice(&buf[body_end..crc_end]);
            let expected = u32::from_be_bytes(crc_raw);
            let actual = crc32fast::hash(body);
            if expected != actual {
                return Err(Error::corruption(format!(
                    "{}: manifest checksum mismatch at offset {offset}: expected {expected:#010x}, got {actual:#010x}",
                    path.display()
                )));
            }
            edits.push(serde_json::from_slice(body)?);
            offset = crc_end;
        }
        Ok(edits)
    }

    /// Appends one edit and makes it durable.
    pub fn add_record(&mut self, edit: &VersionEdit) -> Result<()> {
        let body = serde_json::to_vec(edit)
            .map_err(|e| Error::invalid_argument(format!("unserializable version edit: {e}")))?;
        let mut record = Vec::with_capacity(LEN_SIZE + body.len() + CRC_SIZE);
        record.extend_from_slice(&(body.len() as u64).to_be_bytes());
        record.extend_from_slice(&body);
        record.extend_from_slice(&crc32fast::hash(&body).to_be_bytes());
        self.file.write_all(&record)?;
        if self.use_fsync {
            self.file.sync_all()?;
        } else {
            self.file.sync_data()?;
        }
        Ok(())
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }
}
