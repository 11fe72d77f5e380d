//! Engine configuration.

use std::fmt;
use std::sync::Arc;

use crate::bloom::{BloomFilterPolicy, FilterPolicy};
use crate::comparator::{Comparator, default_comparator};
use crate::error::{Error, Result};
use crate::merge_operator::MergeOperator;
use crate::snapshot::Snapshot;
use crate::sstable::{CompressionType, TableBuilderOptions};
use crate::wal::SyncPolicy;

/// Engine-wide options, fixed at open.
#[derive(Clone)]
pub struct Options {
    pub create_if_missing: bool,
    pub error_if_exists: bool,
    /// Treat mid-log WAL corruption as fatal. When off, replay stops at the
    /// damage and the segment is moved to `<db>/lost/`.
    pub paranoid_checks: bool,

    pub comparator: Arc<dyn Comparator>,
    pub merge_operator: Option<Arc<dyn MergeOperator>>,
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    /// Bytes a memtable may hold before it is frozen.
    pub write_buffer_size: usize,
    /// Mutable plus immutable memtables allowed at once.
    pub max_write_buffer_number: usize,
    /// Immutable memtables to accumulate before a background flush.
    pub min_write_buffer_number_to_merge: usize,

    pub max_open_files: usize,
    /// Block cache size in bytes. Zero disables the cache.
    pub block_cache_capacity: u64,

    pub block_size: usize,
    pub block_restart_interval: usize,
    pub compression: CompressionType,
    /// Overrides `compression` per level when non-empty.
    pub compression_per_level: Vec<CompressionType>,

    pub num_levels: usize,
    pub level0_file_num_compaction_trigger: usize,
    pub level0_slowdown_writes_trigger: usize,
    pub level0_stop_writes_trigger: usize,
    /// Deepest level a flushed memtable may be placed at.
    pub max_mem_compaction_level: usize,

    pub target_file_size_base: u64,
    pub target_file_size_multiplier: u64,
    pub max_bytes_for_level_base: u64,
    pub max_bytes_for_level_multiplier: u64,
    pub expanded_compaction_factor: u64,
    pub max_grandparent_overlap_factor: u64,
    pub disable_auto_compactions: bool,

    /// `sync_all` instead of `sync_data`.
    pub use_fsync: bool,
    /// Skip syncing table files after writing them.
    pub disable_data_sync: bool,
    pub wal_sync_policy: SyncPolicy,
    pub wal_ttl_seconds: u64,
    pub wal_size_limit_mb: u64,

    pub background_threads: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: false,
            error_if_exists: false,
            paranoid_checks: true,
            comparator: default_comparator(),
            merge_operator: None,
            filter_policy: Some(Arc::new(BloomFilterPolicy::new(10))),
            write_buffer_size: 4 << 20,
            max_write_buffer_number: 2,
            min_write_buffer_number_to_merge: 1,
            max_open_files: 1000,
            block_cache_capacity: 8 << 20,
            block_size: 4096,
            block_restart_interval: 16,
            compression: CompressionType::Lz4,
            compression_per_level: Vec::new(),
            num_levels: 7,
            level0_file_num_compaction_trigger: 4,
            level0_slowdown_writes_trigger: 8,
            level0_stop_writes_trigger: 12,
            max_mem_compaction_level: 2,
            target_file_size_base: 2 << 20,
            target_file_size_multiplier: 1,
            max_bytes_for_level_base: 10 << 20,
            max_bytes_for_level_multiplier: 10,
            expanded_compaction_factor: 25,
            max_grandparent_overlap_factor: 10,
            disable_auto_compactions: false,
            use_fsync: false,
            disable_data_sync: false,
            wal_sync_policy: SyncPolicy::Manual,
            wal_ttl_seconds: 0,
            wal_size_limit_mb: 0,
            background_threads: 1,
        }
    }
}

impl Options {
    /// Rejects inconsistent settings before anything touches the disk.
    pub fn validate(&self) -> Result<()> {
        fn check(ok: bool, msg: &str) -> Result<()> {
            if ok { Ok(()) } else { Err(Error::invalid_argument(msg)) }
        }

        check(self.num_levels >= 2, "num_levels must be at least 2")?;
        check(
            self.max_mem_compaction_level < self.num_levels,
            "max_mem_compaction_level must be below num_levels",
        )?;
        check(
            self.level0_file_num_compaction_trigger >= 1,
            "level0_file_num_compaction_trigger must be at least 1",
        )?;
        check(
            self.level0_file_num_compaction_trigger <= self.level0_slowdown_writes_trigger
                && self.level0_slowdown_writes_trigger <= self.level0_stop_writes_trigger,
            "level-0 triggers must satisfy compaction <= slowdown <= stop",
        )?;
        check(self.max_write_buffer_number >= 2, "max_write_buffer_number must be at least 2")?;
        check(
            self.min_write_buffer_number_to_merge >= 1
                && self.min_write_buffer_number_to_merge < self.max_write_buffer_number,
            "min_write_buffer_number_to_merge must be in [1, max_write_buffer_number)",
        )?;
        check(self.block_restart_interval >= 1, "block_restart_interval must be at least 1")?;
        check(self.write_buffer_size > 0, "write_buffer_size must be non-zero")?;
        check(self.block_size > 0, "block_size must be non-zero")?;
        check(self.target_file_size_base > 0, "target_file_size_base must be non-zero")?;
        check(self.max_bytes_for_level_base > 0, "max_bytes_for_level_base must be non-zero")?;
        check(
            self.target_file_size_multiplier >= 1 && self.max_bytes_for_level_multiplier >= 1,
            "size multipliers must be at least 1",
        )?;
        check(self.max_open_files >= 1, "max_open_files must be at least 1")?;
        check(
            self.compression_per_level.is_empty() || self.compression_per_level.len() == self.num_levels,
            "compression_per_level must be empty or have num_levels entries",
        )?;
        check(self.background_threads >= 1, "background_threads must be at least 1")?;
        if let SyncPolicy::EveryNWrites(0) = self.wal_sync_policy {
            return Err(Error::invalid_argument("EveryNWrites needs a non-zero count"));
        }
        Ok(())
    }

    /// Size at which compaction outputs for `level` are cut.
    pub fn target_file_size(&self, level: usize) -> u64 {
        let mut size = self.target_file_size_base;
        for _ in 0..level {
            size = size.saturating_mul(self.target_file_size_multiplier);
        }
        size
    }

    /// Byte budget of level `level` (≥ 1) before it needs compaction.
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let mut bytes = self.max_bytes_for_level_base;
        for _ in 1..level {
            bytes = bytes.saturating_mul(self.max_bytes_for_level_multiplier);
        }
        bytes
    }

    pub fn compression_for_level(&self, level: usize) -> CompressionType {
        self.compression_per_level
            .get(level)
            .copied()
            .unwrap_or(self.compression)
    }

    /// Builder settings for a table destined for `level`.
    pub fn table_options(&self, level: usize) -> TableBuilderOptions {
        TableBuilderOptions {
            block_size: self.block_size,
            restart_interval: self.block_restart_interval,
            compression: self.compression_for_level(level),
            comparator: Arc::clone(&self.comparator),
            filter_policy: self.filter_policy.clone(),
            sync: !self.disable_data_sync,
            use_fsync: self.use_fsync,
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("comparator", &self.comparator.name())
            .field("merge_operator", &self.merge_operator.as_ref().map(|m| m.name().to_string()))
            .field("filter_policy", &self.filter_policy.as_ref().map(|p| p.name().to_string()))
            .field("write_buffer_size", &self.write_buffer_size)
            .field("max_write_buffer_number", &self.max_write_buffer_number)
            .field("block_size", &self.block_size)
            .field("compression", &self.compression)
            .field("num_levels", &self.num_levels)
            .field("level0_file_num_compaction_trigger", &self.level0_file_num_compaction_trigger)
            .field("level0_slowdown_writes_trigger", &self.level0_slowdown_writes_trigger)
            .field("level0_stop_writes_trigger", &self.level0_stop_writes_trigger)
            .field("target_file_size_base", &self.target_file_size_base)
            .field("max_bytes_for_level_base", &self.max_bytes_for_level_base)
            .field("wal_sync_policy", &self.wal_sync_policy)
            .finish_non_exhaustive()
    }
}

/// Per-read options.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Read as of this snapshot instead of the latest sequence.
    pub snapshot: Option<Snapshot>,
    /// Populate the block cache with blocks read for this request.
    pub fill_cache: bool,
    /// Iterators only see keys starting with these bytes. Point reads
    /// ignore it.
    pub prefix: Option<Vec<u8>>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            snapshot: None,
            fill_cache: true,
            prefix: None,
        }
    }
}

/// Per-write options.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// Sync the WAL before acknowledging, whatever the sync policy says.
    pub sync: bool,
    /// Skip the WAL. Such writes are lost on a crash before their flush.
    pub disable_wal: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FlushOptions {
    /// Block until the flush is installed.
    pub wait: bool,
}

impl Default for FlushOptions {
    fn default() -> Self {
        Self { wait: true }
    }
}
