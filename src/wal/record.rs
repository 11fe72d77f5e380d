use bytes::{Buf, BufMut};

use crate::error::{Error, Result};

/// A single record in the WAL: one encoded write batch.
///
/// On-disk format:
/// ```text
/// ┌──────────┬──────────┬─────────────────────┐
/// │ CRC (4B) │ Len (4B) │ Payload (Len bytes) │
/// └──────────┴──────────┴─────────────────────┘
/// ```
///
/// CRC covers everything after the CRC field itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WALRecord {
    pub payload: Vec<u8>,
}

const CRC_SIZE: usize = 4;
const LEN_SIZE: usize = 4;
pub const HEADER_SIZE: usize = CRC_SIZE + LEN_SIZE;

/// How a decode attempt at some offset of a log went.
#[derive(Debug)]
pub enum Frame {
    /// A complete, checksummed record spanning `len` bytes.
    Record(WALRecord, usize),
    /// The buffer ends before the header or payload does.
    Truncated,
    /// A complete frame of `len` bytes whose checksum does not match.
    BadChecksum(usize),
}

impl WALRecord {
    pub fn new(payload: Vec<u8>) -> Self {
        WALRecord { payload }
    }

    /// Serialize this record to bytes (including CRC header).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_size());
        buf.put_u32_le(0);
        buf.put_u32_le(self.payload.len() as u32);
        buf.extend_from_slice(&self.payload);

        let crc = crc32fast::hash(&buf[CRC_SIZE..]);
        buf[..CRC_SIZE].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Inspect the frame at the start of `data` without failing on damage.
    pub fn read_frame(data: &[u8]) -> Frame {
        if data.len() < HEADER_SIZE {
            return Frame::Truncated;
        }
        let mut header = &data[..HEADER_SIZE];
        let stored_crc = header.get_u32_le();
        let payload_len = header.get_u32_le() as usize;

        let total_len = HEADER_SIZE + payload_len;
        if data.len() < total_len {
            return Frame::Truncated;
        }
        if crc32fast::hash(&data[CRC_SIZE..total_len]) != stored_crc {
            return Frame::BadChecksum(total_len);
        }
        Frame::Record(
            WALRecord {
                payload: data[HEADER_SIZE..total_len].to_vec(),
            },
            total_len,
        )
    }

    /// Deserialize a record from bytes. Returns error if CRC doesn't match.
    pub fn decode(data: &[u8]) -> Result<Self> {
        match Self::read_frame(data) {
            Frame::Record(record, _) => Ok(record),
            Frame::Truncated => Err(Error::corruption("record truncated")),
            Frame::BadChecksum(_) => Err(Error::corruption("CRC mismatch")),
        }
    }

    /// Size of this record when serialized on disk.
    pub fn encoded_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}
