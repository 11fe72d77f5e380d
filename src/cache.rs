//! Shared caches: decoded data blocks and open table readers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use moka::sync::Cache;

use crate::error::Result;
use crate::filename::table_file_name;
use crate::sstable::block::Block;
use crate::sstable::{SSTable, TableReadOptions};

/// Decoded data blocks keyed by (table number, block offset), weighed in bytes.
pub type BlockCache = Cache<(u64, u64), Arc<Block>>;

pub fn new_block_cache(capacity_bytes: u64) -> BlockCache {
    Cache::builder()
        .max_capacity(capacity_bytes)
        .weigher(|_key: &(u64, u64), block: &Arc<Block>| -> u32 {
            block.size().try_into().unwrap_or(u32::MAX)
        })
        .build()
}

/// Open table readers keyed by file number. The capacity bounds the number
/// of file handles the engine keeps open.
pub struct TableCache {
    dir: PathBuf,
    options: TableReadOptions,
    tables: Cache<u64, Arc<SSTable>>,
}

impl TableCache {
    pub fn new(dir: &Path, options: TableReadOptions, max_open_files: usize) -> Self {
        Self {
            dir: dir.to_path_buf(),
            options,
            tables: Cache::new(max_open_files as u64),
        }
    }

    /// Returns the reader for table `number`, opening the file on a miss.
    pub fn find_table(&self, number: u64) -> Result<Arc<SSTable>> {
        if let Some(table) = self.tables.get(&number) {
            return Ok(table);
        }
        let path = table_file_name(&self.dir, number);
        let table = Arc::new(SSTable::open(number, &path, &self.options)?);
        self.tables.insert(number, Arc::clone(&table));
        Ok(table)
    }

    /// Drops the cached reader for a table that is about to be deleted.
    pub fn evict(&self, number: u64) {
        self.tables.invalidate(&number);
    }

    pub fn block_cache(&self) -> Option<&BlockCache> {
        self.options.block_cache.as_ref()
    }
}
