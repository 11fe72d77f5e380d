use bytes::{Buf, BufMut};

use crate::error::{Error, Result};
use crate::sstable::compression::CompressionType;

/// Magic number to identify SSTable files.
pub const SSTABLE_MAGIC: u64 = 0x4C534D4B_56535354; // "LSMKVSST"

/// Bumped whenever the on-disk table layout changes.
pub const FORMAT_VERSION: u32 = 1;

/// Every block is followed by `[compression type u8][crc32 u32]`.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Location of a block within a table file. `size` excludes the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub const ENCODED_LEN: usize = 16;

    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        buf.put_u64_le(self.offset);
        buf.put_u64_le(self.size);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::ENCODED_LEN);
        self.encode_to(&mut buf);
        buf
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        if data.len() < Self::ENCODED_LEN {
            return Err(Error::corruption("block handle truncated"));
        }
        Ok(Self {
            offset: data.get_u64_le(),
            size: data.get_u64_le(),
        })
    }
}

/// Checksum stored in a block trailer: covers the contents and the type byte.
pub fn block_checksum(contents: &[u8], compression: CompressionType) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(contents);
    hasher.update(&[compression as u8]);
    hasher.finalize()
}

/// The footer sits at the end of the SSTable file.
/// It tells the reader where to find the index and meta blocks.
///
/// ```text
/// ┌──────────────────────────────────────┐
/// │ Filter block handle (16B)            │
/// │ Properties block handle (16B)        │
/// │ Index block handle (16B)             │
/// │ Format version (4B)                  │
/// │ Magic number (8B)                    │
/// └──────────────────────────────────────┘
/// ```
///
/// A table without a filter stores a zero-sized filter handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footer {
    pub filter: BlockHandle,
    pub properties: BlockHandle,
    pub index: BlockHandle,
    pub format_version: u32,
}

impl Footer {
    pub const SIZE: usize = 3 * BlockHandle::ENCODED_LEN + 4 + 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        self.filter.encode_to(&mut buf);
        self.properties.encode_to(&mut buf);
        self.index.encode_to(&mut buf);
        buf.put_u32_le(self.format_version);
        buf.put_u64_le(SSTABLE_MAGIC);
        buf
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != Self::SIZE {
            return Err(Error::corruption(format!(
                "footer must be {} bytes, got {}",
                Self::SIZE,
                data.len()
            )));
        }
        let mut tail = &data[Self::SIZE - 12..];
        let format_version = tail.get_u32_le();
        let magic = tail.get_u64_le();
        if magic != SSTABLE_MAGIC {
            return Err(Error::corruption(format!("bad table magic {magic:#018x}")));
        }
        if format_version != FORMAT_VERSION {
            return Err(Error::NotSupported(format!(
                "table format version {format_version}"
            )));
        }
        let h = BlockHandle::ENCODED_LEN;
        Ok(Self {
            filter: BlockHandle::decode(&data[..h])?,
            properties: BlockHandle::decode(&data[h..2 * h])?,
            index: BlockHandle::decode(&data[2 * h..3 * h])?,
            format_version,
        })
    }
}

/// Summary statistics written into each table's properties block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableProperties {
    pub num_entries: u64,
    pub num_data_blocks: u64,
    pub raw_key_size: u64,
    pub raw_value_size: u64,
    pub data_size: u64,
    pub comparator: String,
    pub filter_policy: String,
    pub compression: String,
}

const PROP_COMPARATOR: &[u8] = b"lsmkv.comparator";
const PROP_COMPRESSION: &[u8] = b"lsmkv.compression";
const PROP_DATA_SIZE: &[u8] = b"lsmkv.data.size";
const PROP_FILTER: &[u8] = b"lsmkv.filter.policy";
const PROP_NUM_BLOCKS: &[u8] = b"lsmkv.num.data.blocks";
const PROP_NUM_ENTRIES: &[u8] = b"lsmkv.num.entries";
const PROP_RAW_KEY: &[u8] = b"lsmkv.raw.key.size";
const PROP_RAW_VALUE: &[u8] = b"lsmkv.raw.value.size";

impl TableProperties {
    /// Key/value pairs in bytewise order, ready for a `BlockBuilder`.
    pub fn to_entries(&self) -> Vec<(&'static [u8], Vec<u8>)> {
        vec![
            (PROP_COMPARATOR, self.comparator.as_bytes().to_vec()),
            (PROP_COMPRESSION, self.compression.as_bytes().to_vec()),
            (PROP_DATA_SIZE, self.data_size.to_le_bytes().to_vec()),
            (PROP_FILTER, self.filter_policy.as_bytes().to_vec()),
            (PROP_NUM_BLOCKS, self.num_data_blocks.to_le_bytes().to_vec()),
            (PROP_NUM_ENTRIES, self.num_entries.to_le_bytes().to_vec()),
            (PROP_RAW_KEY, self.raw_key_size.to_le_bytes().to_vec()),
            (PROP_RAW_VALUE, self.raw_value_size.to_le_bytes().to_vec()),
        ]
    }

    /// Unknown keys are skipped so newer writers stay readable.
    pub fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let number = || -> Result<u64> {
            let raw: [u8; 8] = value
                .try_into()
                .map_err(|_| Error::corruption("table property is not a u64"))?;
            Ok(u64::from_le_bytes(raw))
        };
        let text = || String::from_utf8_lossy(value).into_owned();
        match key {
            PROP_COMPARATOR => self.comparator = text(),
            PROP_COMPRESSION => self.compression = text(),
            PROP_FILTER => self.filter_policy = text(),
            PROP_DATA_SIZE => self.data_size = number()?,
            PROP_NUM_BLOCKS => self.num_data_blocks = number()?,
            PROP_NUM_ENTRIES => self.num_entries = number()?,
            PROP_RAW_KEY => self.raw_key_size = number()?,
            PROP_RAW_VALUE => self.raw_value_size = number()?,
            _ => {}
        }
        Ok(())
    }
}
