//! # lsmkv
//!
//! An embedded key-value storage engine using the Log-Structured
//! Merge-Tree design.
//!
//! ## How it stores data
//! Writes are logged, buffered in an ordered in-memory table, and written
//! out as immutable sorted tables once the buffer fills. Background
//! compaction merges those tables level by level, so the disk only ever
//! sees sequential writes.
//!
//! ## Write path
//! ```text
//! WriteBatch ─► WAL append ─► memtable ─(full)─► immutable memtable
//!                                                   │ flush
//!                                                   ▼
//!                               level 0 ─► level 1 ─► ... (compaction)
//! ```
//! Every operation gets a sequence number. Reads see the newest version
//! at or below their sequence, which is how snapshots work.
//!
//! ```no_run
//! use lsmkv::{DB, Options};
//!
//! # fn main() -> lsmkv::Result<()> {
//! let db = DB::open("/tmp/lsmkv-demo", Options { create_if_missing: true, ..Options::default() })?;
//! db.put(b"hello", b"world")?;
//! assert_eq!(db.get(b"hello")?, Some(b"world".to_vec()));
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod bloom;
pub mod cache;
pub mod cleaner;
pub mod coding;
pub mod comparator;
pub mod compaction;
pub mod db;
pub mod error;
pub mod filename;
pub mod iterator;
pub mod lookup;
pub mod memtable;
pub mod merge_operator;
pub mod options;
pub mod snapshot;
pub mod sstable;
pub mod types;
pub mod version;
pub mod wal;

// Public re-exports for the top-level API
pub use batch::WriteBatch;
pub use bloom::{BloomFilterPolicy, FilterPolicy};
pub use comparator::{BytewiseComparator, Comparator};
pub use db::{DB, LevelStats, Stats};
pub use error::{Error, Result};
pub use iterator::{DBIterator, StorageIterator};
pub use merge_operator::{MergeOperator, StringAppendOperator};
pub use options::{FlushOptions, Options, ReadOptions, WriteOptions};
pub use snapshot::Snapshot;
pub use sstable::CompressionType;
pub use wal::SyncPolicy;
