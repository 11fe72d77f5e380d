use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bloom::FilterPolicy;
use crate::comparator::{BytewiseComparator, Comparator, InternalKeyComparator};
use crate::error::Result;
use crate::sstable::block::{BlockBuilder, DEFAULT_RESTART_INTERVAL};
use crate::sstable::compression::{CompressionType, compress_block};
use crate::sstable::footer::{
    BLOCK_TRAILER_SIZE, BlockHandle, FORMAT_VERSION, Footer, TableProperties, block_checksum,
};
use crate::types::{SequenceNumber, extract_user_key, parse_internal_key};

/// Knobs for writing one table. Derived from `Options` by the engine.
#[derive(Clone)]
pub struct TableBuilderOptions {
    pub block_size: usize,
    pub restart_interval: usize,
    pub compression: CompressionType,
    /// User-key comparator; entries are ordered by the internal comparator built on it.
    pub comparator: Arc<dyn Comparator>,
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    /// Sync the file on finish.
    pub sync: bool,
    /// `sync_all` when true, `sync_data` otherwise.
    pub use_fsync: bool,
}

impl Default for TableBuilderOptions {
    fn default() -> Self {
        Self {
            block_size: 4096,
            restart_interval: DEFAULT_RESTART_INTERVAL,
            compression: CompressionType::None,
            comparator: Arc::new(BytewiseComparator),
            filter_policy: None,
            sync: true,
            use_fsync: true,
        }
    }
}

/// What `finish` reports about the table it wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltTable {
    pub file_size: u64,
    /// Smallest and largest internal keys.
    pub smallest: Vec<u8>,
    pub largest: Vec<u8>,
    /// Newest sequence number among the entries.
    pub largest_seq: SequenceNumber,
    pub num_entries: u64,
}

/// Builds an SSTable file from a sorted stream of internal key / value pairs.
///
/// Used during:
/// - Memtable flush (sorted memtable → SSTable)
/// - Compaction (merged iterators → new SSTables)
/// - Repair (salvaged WAL records → SSTable)
///
/// Build process:
/// 1. Add entries one by one (must be in internal key order)
/// 2. Entries fill up blocks; when a block is full it's written to disk
/// 3. finish() flushes the last block, writes filter, properties,
///    index, footer, fsync
pub struct SSTableBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    options: TableBuilderOptions,
    icmp: InternalKeyComparator,
    /// Current block being filled with entries.
    data_block: BlockBuilder,
    /// One entry per flushed data block: last key → handle.
    index_block: BlockBuilder,
    /// Tracks current write position in the file.
    offset: u64,
    /// Distinct user keys, in order, for the filter block.
    filter_keys: Vec<Vec<u8>>,
    smallest: Option<Vec<u8>>,
    largest: Vec<u8>,
    largest_seq: SequenceNumber,
    props: TableProperties,
}

impl SSTableBuilder {
    /// Create a new SSTable builder that writes to the given path.
    pub fn new(path: &Path, options: TableBuilderOptions) -> Result<Self> {
        let file = File::create(path)?;
        let props = TableProperties {
            comparator: options.comparator.name().to_string(),
            filter_policy: options
                .filter_policy
                .as_ref()
                .map(|p| p.name().to_string())
                .unwrap_or_default(),
            compression: options.compression.name().to_string(),
            ..TableProperties::default()
        };
        Ok(SSTableBuilder {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            icmp: InternalKeyComparator::new(Arc::clone(&options.comparator)),
            data_block: BlockBuilder::with_restart_interval(options.block_size, options.restart_interval),
            index_block: BlockBuilder::with_restart_interval(usize::MAX, 1),
            offset: 0,
            filter_keys: Vec::new(),
            smallest: None,
            largest: Vec::new(),
            largest_seq: 0,
            props,
            options,
        })
    }

    /// Add an entry. MUST be called in increasing internal key order.
    ///
    /// Internally:
    /// 1. Try adding to the current block
    /// 2. If block is full: flush block to file, record index entry, start new block
    /// 3. Add the entry to the new block
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug_assert!(
            self.smallest.is_none()
                || self.icmp.compare(&self.largest, key) == std::cmp::Ordering::Less,
            "keys added out of order"
        );

        if self.options.filter_policy.is_some() {
            let user_key = extract_user_key(key);
            if self.filter_keys.last().map(Vec::as_slice) != Some(user_key) {
                self.filter_keys.push(user_key.to_vec());
            }
        }
        if self.smallest.is_none() {
            self.smallest = Some(key.to_vec());
        }
        self.largest.clear();
        self.largest.extend_from_slice(key);
        if let Ok(parsed) = parse_internal_key(key) {
            self.largest_seq = self.largest_seq.max(parsed.sequence);
        }
        self.props.num_entries += 1;
        self.props.raw_key_size += key.len() as u64;
        self.props.raw_value_size += value.len() as u64;

        if !self.data_block.add(key, value) {
            self.flush_block()?;
            // First entry of a fresh block is always accepted.
            self.data_block.add(key, value);
        }
        Ok(())
    }

    /// Flush the current block to disk and record an index entry.
    fn flush_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        let fresh = BlockBuilder::with_restart_interval(self.options.block_size, self.options.restart_interval);
        let block = std::mem::replace(&mut self.data_block, fresh);
        let last_key = block.last_key().to_vec();
        let handle = self.write_block(&block.build(), self.options.compression)?;
        self.index_block.add(&last_key, &handle.encode());
        self.props.num_data_blocks += 1;
        Ok(())
    }

    /// Writes block contents plus trailer, returning where they landed.
    fn write_block(&mut self, raw: &[u8], compression: CompressionType) -> Result<BlockHandle> {
        let (kind, compressed) = compress_block(raw, compression);
        let contents = compressed.as_deref().unwrap_or(raw);
        let handle = BlockHandle::new(self.offset, contents.len() as u64);

        self.writer.write_all(contents)?;
        self.writer.write_all(&[kind as u8])?;
        self.writer.write_all(&block_checksum(contents, kind).to_le_bytes())?;
        self.offset += (contents.len() + BLOCK_TRAILER_SIZE) as u64;
        Ok(handle)
    }

    pub fn num_entries(&self) -> u64 {
        self.props.num_entries
    }

    pub fn is_empty(&self) -> bool {
        self.props.num_entries == 0
    }

    /// Bytes written so far plus the pending block.
    pub fn file_size(&self) -> u64 {
        self.offset + self.data_block.estimated_size() as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Finalize the SSTable: flush last block, write meta blocks, index
    /// block, footer, fsync.
    pub fn finish(mut self) -> Result<BuiltTable> {
        self.flush_block()?;
        self.props.data_size = self.offset;

        let filter_data = match &self.options.filter_policy {
            Some(policy) if !self.filter_keys.is_empty() => Some(policy.create_filter(&self.filter_keys)),
            _ => None,
        };
        let filter = match filter_data {
            Some(data) => self.write_block(&data, CompressionType::None)?,
            None => BlockHandle::default(),
        };

        let mut props_block = BlockBuilder::with_restart_interval(usize::MAX, 1);
        for (key, value) in self.props.to_entries() {
            props_block.add(key, &value);
        }
        let properties = self.write_block(&props_block.build(), CompressionType::None)?;

        let index_block = std::mem::replace(&mut self.index_block, BlockBuilder::new(0));
        let index = self.write_block(&index_block.build(), CompressionType::None)?;

        let footer = Footer {
            filter,
            properties,
            index,
            format_version: FORMAT_VERSION,
        };
        self.writer.write_all(&footer.encode())?;
        self.offset += Footer::SIZE as u64;

        self.writer.flush()?;
        if self.options.sync {
            if self.options.use_fsync {
                self.writer.get_ref().sync_all()?;
            } else {
                self.writer.get_ref().sync_data()?;
            }
        }

        Ok(BuiltTable {
            file_size: self.offset,
            smallest: self.smallest.unwrap_or_default(),
            largest: self.largest,
            largest_seq: self.largest_seq,
            num_entries: self.props.num_entries,
        })
    }

    /// Discard a partially written table.
    pub fn abandon(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        std::fs::remove_file(path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ValueType, encode_internal_key};
    use tempfile::tempdir;

    fn ikey(k: &str, seq: u64) -> Vec<u8> {
        encode_internal_key(k.as_bytes(), seq, ValueType::Put)
    }

    #[test]
    fn build_sstable_from_sorted_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.sst");

        let mut builder = SSTableBuilder::new(&path, TableBuilderOptions::default()).unwrap();
        for i in 0..100u32 {
            let key = format!("key_{:05}", i);
            let val = format!("val_{:05}", i);
            builder.add(&ikey(&key, u64::from(i) + 1), val.as_bytes()).unwrap();
        }
        let built = builder.finish().unwrap();

        assert_eq!(built.num_entries, 100);
        assert_eq!(built.smallest, ikey("key_00000", 1));
        assert_eq!(built.largest, ikey("key_00099", 100));
        assert_eq!(built.largest_seq, 100);
        assert_eq!(built.file_size, std::fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn abandon_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.sst");
        let mut builder = SSTableBuilder::new(&path, TableBuilderOptions::default()).unwrap();
        builder.add(&ikey("a", 1), b"x").unwrap();
        builder.abandon().unwrap();
        assert!(!path.exists());
    }
}
