use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::bloom::FilterPolicy;
use crate::cache::BlockCache;
use crate::comparator::{BytewiseComparator, Comparator, InternalKeyComparator};
use crate::error::{Error, Result};
use crate::iterator::StorageIterator;
use crate::lookup::LookupState;
use crate::sstable::block::Block;
use crate::sstable::compression::{CompressionType, decompress_block};
use crate::sstable::footer::{BLOCK_TRAILER_SIZE, BlockHandle, Footer, TableProperties, block_checksum};
use crate::sstable::iterator::SSTableIterator;
use crate::types::parse_internal_key;

/// What a reader needs besides the file itself.
#[derive(Clone)]
pub struct TableReadOptions {
    pub comparator: Arc<dyn Comparator>,
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    pub block_cache: Option<BlockCache>,
}

impl Default for TableReadOptions {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
            filter_policy: None,
            block_cache: None,
        }
    }
}

/// An opened SSTable file. Supports point lookups and range scans.
///
/// On open:
/// 1. Read footer (last 60 bytes) → find index and meta block positions
/// 2. Read and verify the index block, properties and filter
/// 3. Ready for queries (data blocks read on demand, through the block cache)
pub struct SSTable {
    number: u64,
    /// Path to the SSTable file (for debugging/error messages).
    path: PathBuf,
    file: Mutex<File>,
    file_size: u64,
    icmp: InternalKeyComparator,
    index: Arc<Block>,
    filter: Option<Vec<u8>>,
    filter_policy: Option<Arc<dyn FilterPolicy>>,
    properties: TableProperties,
    block_cache: Option<BlockCache>,
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("number", &self.number)
            .field("path", &self.path)
            .field("file_size", &self.file_size)
            .finish_non_exhaustive()
    }
}

impl SSTable {
    /// Open an SSTable file. `number` keys its blocks in the block cache.
    pub fn open(number: u64, path: &Path, options: &TableReadOptions) -> Result<Self> {
        let mut file = File::open(path)?;

        let file_size = file.metadata()?.len();
        if file_size < Footer::SIZE as u64 {
            return Err(Error::corruption(format!(
                "{}: file too short to contain footer",
                path.display()
            )));
        }

        let footer_offset = file_size - Footer::SIZE as u64;
        file.seek(SeekFrom::Start(footer_offset))?;
        let mut footer_buf = vec![0u8; Footer::SIZE];
        file.read_exact(&mut footer_buf)?;
        let footer = Footer::decode(&footer_buf)
            .map_err(|e| Error::corruption(format!("{}: {e}", path.display())))?;

        let index = Arc::new(Block::decode(read_raw_block(&mut file, path, file_size, footer.index)?)?);

        let props_raw = read_raw_block(&mut file, path, file_size, footer.properties)?;
        let props_block = Arc::new(Block::decode(props_raw)?);
        let mut properties = TableProperties::default();
        let mut it = props_block.iter();
        while it.is_valid() {
            properties.set(it.key(), it.value())?;
            it.next()?;
        }

        if !properties.comparator.is_empty() && properties.comparator != options.comparator.name() {
            return Err(Error::ComparatorMismatch {
                expected: properties.comparator.clone(),
                found: options.comparator.name().to_string(),
            });
        }

        let mut filter = None;
        let mut filter_policy = None;
        if let Some(policy) = &options.filter_policy {
            if footer.filter.size > 0 && properties.filter_policy == policy.name() {
                filter = Some(read_raw_block(&mut file, path, file_size, footer.filter)?);
                filter_policy = Some(Arc::clone(policy));
            }
        }

        Ok(SSTable {
            number,
            path: path.to_path_buf(),
            file: Mutex::new(file),
            file_size,
            icmp: InternalKeyComparator::new(Arc::clone(&options.comparator)),
            index,
            filter,
            filter_policy,
            properties,
            block_cache: options.block_cache.clone(),
        })
    }

    /// Loads a data block, consulting the block cache first.
    pub(crate) fn read_block(&self, handle: BlockHandle, fill_cache: bool) -> Result<Arc<Block>> {
        let cache_key = (self.number, handle.offset);
        if let Some(cache) = &self.block_cache {
            if let Some(block) = cache.get(&cache_key) {
                return Ok(block);
            }
        }
        let raw = {
            let mut file = self.file.lock();
            read_raw_block(&mut file, &self.path, self.file_size, handle)?
        };
        let block = Arc::new(Block::decode(raw)?);
        if fill_cache {
            if let Some(cache) = &self.block_cache {
                cache.insert(cache_key, Arc::clone(&block));
            }
        }
        Ok(block)
    }

    pub(crate) fn index_block(&self) -> &Arc<Block> {
        &self.index
    }

    pub(crate) fn internal_comparator(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    /// Create an iterator over every internal entry.
    pub fn iter(self: &Arc<Self>, fill_cache: bool) -> SSTableIterator {
        SSTableIterator::new(Arc::clone(self), fill_cache)
    }

    /// false → the user key is definitely not in this table.
    pub fn may_contain(&self, user_key: &[u8]) -> bool {
        match (&self.filter_policy, &self.filter) {
            (Some(policy), Some(filter)) => policy.key_may_match(user_key, filter),
            _ => true,
        }
    }

    /// Feeds the versions of the lookup's user key held by this table.
    /// Returns true once the lookup is resolved.
    pub fn get(self: &Arc<Self>, state: &mut LookupState, fill_cache: bool) -> Result<bool> {
        if !self.may_contain(state.user_key()) {
            return Ok(false);
        }
        let mut iter = self.iter(fill_cache);
        iter.seek(state.lookup_key())?;
        while iter.is_valid() {
            let parsed = parse_internal_key(iter.key())?;
            if self.icmp.compare_user(parsed.user_key, state.user_key()) != std::cmp::Ordering::Equal {
                break;
            }
            if state.add(parsed.value_type, iter.value()) {
                return Ok(true);
            }
            iter.next()?;
        }
        Ok(false)
    }

    /// Approximate byte offset within the file where `key` would live.
    pub fn approximate_offset_of(&self, key: &[u8]) -> u64 {
        let mut index = self.index.iter_with(Arc::new(self.icmp.clone()));
        if index.seek(key).is_ok() && index.is_valid() {
            if let Ok(handle) = BlockHandle::decode(index.value()) {
                return handle.offset;
            }
        }
        // Past the last key: the data ends where the meta blocks begin.
        self.properties.data_size
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn properties(&self) -> &TableProperties {
        &self.properties
    }
}

/// Reads a block, verifies its trailer checksum and decompresses it.
fn read_raw_block(file: &mut File, path: &Path, file_size: u64, handle: BlockHandle) -> Result<Vec<u8>> {
    let end = handle.offset + handle.size + BLOCK_TRAILER_SIZE as u64;
    if end > file_size {
        return Err(Error::corruption(format!(
            "{}: block {}+{} past end of file",
            path.display(),
            handle.offset,
            handle.size
        )));
    }
    let mut buf = vec![0u8; handle.size as usize + BLOCK_TRAILER_SIZE];
    file.seek(SeekFrom::Start(handle.offset))?;
    file.read_exact(&mut buf)?;

    let n = handle.size as usize;
    let kind = CompressionType::from_u8(buf[n])?;
    let stored = u32::from_le_bytes([buf[n + 1], buf[n + 2], buf[n + 3], buf[n + 4]]);
    if block_checksum(&buf[..n], kind) != stored {
        return Err(Error::corruption(format!(
            "{}: block checksum mismatch at offset {}",
            path.display(),
            handle.offset
        )));
    }
    buf.truncate(n);
    decompress_block(buf, kind)
}
